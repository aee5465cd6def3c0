//! The request-scoped context threaded into every engine call.

use tokio_util::sync::CancellationToken;

use arrels_core::UserId;

use crate::{Error, Result};

/// Who is acting, in which language, and whether the request is still wanted.
///
/// Engines check [`RequestContext::ensure_active`] before each write; a write
/// that has already started is allowed to commit.
#[derive(Debug, Clone)]
pub struct RequestContext {
  pub user_id: UserId,
  pub lang:    String,
  pub cancel:  CancellationToken,
}

impl RequestContext {
  pub fn new(user_id: UserId) -> Self {
    Self { user_id, lang: "ca".to_owned(), cancel: CancellationToken::new() }
  }

  pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
    self.lang = lang.into();
    self
  }

  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn ensure_active(&self) -> Result<()> {
    if self.cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }
    Ok(())
  }
}
