//! SQL schema for the Arrels SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
///
/// Every contributed entity table carries the moderation columns
/// `moderation_state, created_by, created_at, moderated_by, moderated_at,
/// motiu`. Timestamps are RFC 3339 UTC strings.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- ── Users, groups, policies ────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS users (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    login            TEXT NOT NULL UNIQUE,
    nom              TEXT,
    cognoms          TEXT,
    email            TEXT,
    locale           TEXT NOT NULL DEFAULT 'ca',
    password_hash    TEXT NOT NULL,
    actiu            INTEGER NOT NULL DEFAULT 0,
    activation_token TEXT UNIQUE,
    nom_privat       INTEGER NOT NULL DEFAULT 0,
    ranking_privat   INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS groups (
    id  INTEGER PRIMARY KEY AUTOINCREMENT,
    nom TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS user_groups (
    user_id  INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    group_id INTEGER NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    PRIMARY KEY (user_id, group_id)
);

CREATE TABLE IF NOT EXISTS policies (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    nom        TEXT NOT NULL UNIQUE,
    descripcio TEXT,
    document   TEXT NOT NULL,     -- JSON permission document
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS policy_users (
    policy_id INTEGER NOT NULL REFERENCES policies(id) ON DELETE CASCADE,
    user_id   INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    PRIMARY KEY (policy_id, user_id)
);

CREATE TABLE IF NOT EXISTS policy_groups (
    policy_id INTEGER NOT NULL REFERENCES policies(id) ON DELETE CASCADE,
    group_id  INTEGER NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    PRIMARY KEY (policy_id, group_id)
);

-- ── Territory ──────────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS paisos (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    nom              TEXT NOT NULL,
    codi_iso2        TEXT NOT NULL UNIQUE,
    codi_iso3        TEXT,
    moderation_state TEXT NOT NULL DEFAULT 'pendent',
    created_by       INTEGER,
    created_at       TEXT,
    moderated_by     INTEGER,
    moderated_at     TEXT,
    motiu            TEXT
);

CREATE TABLE IF NOT EXISTS nivells (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    nom              TEXT NOT NULL,
    nivell           INTEGER NOT NULL CHECK (nivell BETWEEN 1 AND 7),
    tipus            TEXT,
    pais_id          INTEGER,
    parent_id        INTEGER,
    any_inici        INTEGER,
    any_fi           INTEGER,
    moderation_state TEXT NOT NULL DEFAULT 'pendent',
    created_by       INTEGER,
    created_at       TEXT,
    moderated_by     INTEGER,
    moderated_at     TEXT,
    motiu            TEXT
);

CREATE TABLE IF NOT EXISTS municipis (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    nom              TEXT NOT NULL,
    tipus            TEXT,
    pais_id          INTEGER,
    codi_postal      TEXT,
    latitud          REAL,
    longitud         REAL,
    moderation_state TEXT NOT NULL DEFAULT 'pendent',
    created_by       INTEGER,
    created_at       TEXT,
    moderated_by     INTEGER,
    moderated_at     TEXT,
    motiu            TEXT
);

-- Enclosing administrative levels of a municipality, in form order.
CREATE TABLE IF NOT EXISTS municipi_nivells (
    municipi_id INTEGER NOT NULL REFERENCES municipis(id) ON DELETE CASCADE,
    nivell_id   INTEGER NOT NULL,
    pos         INTEGER NOT NULL,
    PRIMARY KEY (municipi_id, nivell_id)
);

CREATE TABLE IF NOT EXISTS arquebisbats (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    nom              TEXT NOT NULL,
    tipus            TEXT,
    pais_id          INTEGER,
    parent_id        INTEGER,
    any_inici        INTEGER,
    any_fi           INTEGER,
    web              TEXT,
    moderation_state TEXT NOT NULL DEFAULT 'pendent',
    created_by       INTEGER,
    created_at       TEXT,
    moderated_by     INTEGER,
    moderated_at     TEXT,
    motiu            TEXT
);

-- ── Documents ──────────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS arxius (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    nom                     TEXT NOT NULL,
    tipus                   TEXT,
    acces                   TEXT,
    municipi_id             INTEGER,
    entitat_eclesiastica_id INTEGER,
    adreca                  TEXT,
    web                     TEXT,
    notes                   TEXT,
    moderation_state        TEXT NOT NULL DEFAULT 'pendent',
    created_by              INTEGER,
    created_at              TEXT,
    moderated_by            INTEGER,
    moderated_at            TEXT,
    motiu                   TEXT
);

CREATE TABLE IF NOT EXISTS llibres (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    titol            TEXT NOT NULL,
    tipus_llibre     TEXT,
    cronologia       TEXT,
    any_inici        INTEGER,
    any_fi           INTEGER,
    municipi_id      INTEGER,
    arquebisbat_id   INTEGER,
    pagines          INTEGER,
    notes            TEXT,
    moderation_state TEXT NOT NULL DEFAULT 'pendent',
    created_by       INTEGER,
    created_at       TEXT,
    moderated_by     INTEGER,
    moderated_at     TEXT,
    motiu            TEXT
);

CREATE TABLE IF NOT EXISTS llibre_arxius (
    llibre_id INTEGER NOT NULL REFERENCES llibres(id) ON DELETE CASCADE,
    arxiu_id  INTEGER NOT NULL,
    pos       INTEGER NOT NULL,
    PRIMARY KEY (llibre_id, arxiu_id)
);

-- ── People, surnames, events ───────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS persones (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    nom              TEXT NOT NULL,
    cognom1          TEXT,
    cognom2          TEXT,
    sexe             TEXT,
    any_naixement    INTEGER,
    any_defuncio     INTEGER,
    municipi_id      INTEGER,
    ofici            TEXT,
    notes            TEXT,
    moderation_state TEXT NOT NULL DEFAULT 'pendent',
    created_by       INTEGER,
    created_at       TEXT,
    moderated_by     INTEGER,
    moderated_at     TEXT,
    motiu            TEXT
);

CREATE TABLE IF NOT EXISTS cognoms (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    forma            TEXT NOT NULL,
    origen           TEXT,
    notes            TEXT,
    moderation_state TEXT NOT NULL DEFAULT 'pendent',
    created_by       INTEGER,
    created_at       TEXT,
    moderated_by     INTEGER,
    moderated_at     TEXT,
    motiu            TEXT
);

CREATE TABLE IF NOT EXISTS cognom_variants (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    cognom_id INTEGER NOT NULL REFERENCES cognoms(id) ON DELETE CASCADE,
    variant   TEXT NOT NULL,
    UNIQUE (cognom_id, variant)
);

-- Only the next hop is stored; chains are walked at read time.
CREATE TABLE IF NOT EXISTS cognom_redirects (
    from_id    INTEGER PRIMARY KEY,
    to_id      INTEGER NOT NULL,
    reason     TEXT,
    created_by INTEGER,
    created_at TEXT NOT NULL,
    CHECK (from_id != to_id)
);

CREATE TABLE IF NOT EXISTS cognom_redirect_suggestions (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    from_id          INTEGER NOT NULL,
    to_id            INTEGER NOT NULL,
    reason           TEXT,
    moderation_state TEXT NOT NULL DEFAULT 'pendent',  -- pendent | acceptat | rebutjat
    created_by       INTEGER NOT NULL,
    created_at       TEXT NOT NULL,
    moderated_by     INTEGER,
    moderated_at     TEXT
);

CREATE TABLE IF NOT EXISTS events_historics (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    titol            TEXT NOT NULL,
    tipus            TEXT,
    any_inici        INTEGER,
    any_fi           INTEGER,
    municipi_id      INTEGER,
    descripcio       TEXT,
    moderation_state TEXT NOT NULL DEFAULT 'pendent',
    created_by       INTEGER,
    created_at       TEXT,
    moderated_by     INTEGER,
    moderated_at     TEXT,
    motiu            TEXT
);

-- ── Wiki ───────────────────────────────────────────────────────────────────

-- Changes are immutable apart from their moderation columns.
CREATE TABLE IF NOT EXISTS wiki_canvis (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    object_type      TEXT NOT NULL CHECK (object_type IN
                       ('municipi', 'arxiu', 'llibre', 'persona', 'cognom', 'event_historic')),
    object_id        INTEGER NOT NULL,
    change_type      TEXT NOT NULL,   -- form | revert | field
    field_key        TEXT,
    old_value        TEXT,
    new_value        TEXT,
    metadata         TEXT NOT NULL,   -- JSON {before, after, reason?, source_change_id?}
    moderation_state TEXT NOT NULL DEFAULT 'pendent',
    changed_by       INTEGER NOT NULL,
    changed_at       TEXT NOT NULL,
    moderated_by     INTEGER,
    moderated_at     TEXT
);

CREATE TABLE IF NOT EXISTS wiki_marques (
    object_type TEXT NOT NULL,
    object_id   INTEGER NOT NULL,
    user_id     INTEGER NOT NULL,
    tipus       TEXT NOT NULL CHECK (tipus IN ('consanguini', 'politic', 'interes')),
    is_public   INTEGER NOT NULL DEFAULT 0,
    UNIQUE (object_type, object_id, user_id)
);

CREATE TABLE IF NOT EXISTS wiki_public_counts (
    object_type TEXT NOT NULL,
    object_id   INTEGER NOT NULL,
    tipus       TEXT NOT NULL,
    n           INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (object_type, object_id, tipus)
);

-- ── Raw transcriptions ─────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS transcripcions_raw (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    llibre_id        INTEGER NOT NULL,
    pagina           TEXT,
    tipus_acte       TEXT,
    data_acte        TEXT,
    any              INTEGER,
    literal          TEXT,
    notes            TEXT,
    moderation_state TEXT NOT NULL DEFAULT 'pendent',
    created_by       INTEGER,
    created_at       TEXT,
    moderated_by     INTEGER,
    moderated_at     TEXT,
    motiu            TEXT
);

CREATE TABLE IF NOT EXISTS transcripcions_persones (
    transcripcio_id INTEGER NOT NULL REFERENCES transcripcions_raw(id) ON DELETE CASCADE,
    pos             INTEGER NOT NULL,
    person_key      TEXT NOT NULL,
    role            TEXT NOT NULL,
    nom             TEXT,
    cognom1         TEXT,
    cognom2         TEXT,
    sexe            TEXT,
    edat            TEXT,
    ofici           TEXT,
    residencia      TEXT,
    PRIMARY KEY (transcripcio_id, person_key)
);

CREATE TABLE IF NOT EXISTS transcripcions_atributs (
    transcripcio_id INTEGER NOT NULL REFERENCES transcripcions_raw(id) ON DELETE CASCADE,
    pos             INTEGER NOT NULL,
    attr_key        TEXT NOT NULL,
    tipus           TEXT NOT NULL,
    value           TEXT NOT NULL,
    PRIMARY KEY (transcripcio_id, attr_key)
);

CREATE TABLE IF NOT EXISTS transcripcions_raw_canvis (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    transcripcio_id  INTEGER NOT NULL REFERENCES transcripcions_raw(id) ON DELETE CASCADE,
    change_type      TEXT NOT NULL,
    change_info      TEXT NOT NULL,   -- JSON ChangeInfo
    old_value        TEXT,
    new_value        TEXT,
    metadata         TEXT NOT NULL DEFAULT '{}',
    moderation_state TEXT NOT NULL DEFAULT 'pendent',
    changed_by       INTEGER NOT NULL,
    changed_at       TEXT NOT NULL,
    moderated_by     INTEGER,
    moderated_at     TEXT
);

-- ── Activity, points, achievements ─────────────────────────────────────────

CREATE TABLE IF NOT EXISTS points_rules (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    code        TEXT NOT NULL UNIQUE,
    name        TEXT NOT NULL,
    description TEXT,
    points      INTEGER NOT NULL DEFAULT 0,
    active      INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS user_points (
    user_id INTEGER PRIMARY KEY,
    total   INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS user_activity (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id      INTEGER NOT NULL,
    rule_id      INTEGER REFERENCES points_rules(id),
    action       TEXT NOT NULL,
    object_type  TEXT NOT NULL,
    object_id    INTEGER,
    points       INTEGER NOT NULL DEFAULT 0,
    status       TEXT NOT NULL DEFAULT 'validat',  -- pendent | validat | anulat
    moderated_by INTEGER,
    details      TEXT NOT NULL DEFAULT '',
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS achievements (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    code        TEXT NOT NULL UNIQUE,
    name        TEXT NOT NULL,
    description TEXT,
    rarity      TEXT NOT NULL DEFAULT 'common',
    visibility  TEXT NOT NULL DEFAULT 'visible',
    domain      TEXT NOT NULL DEFAULT 'general',
    enabled     INTEGER NOT NULL DEFAULT 1,
    repeatable  INTEGER NOT NULL DEFAULT 0,
    icon        TEXT,
    rule_json   TEXT NOT NULL
);

-- `instance` is always 1 for one-shot achievements, so the unique key makes
-- awarding idempotent under concurrent evaluation.
CREATE TABLE IF NOT EXISTS user_achievements (
    user_id        INTEGER NOT NULL,
    achievement_id INTEGER NOT NULL REFERENCES achievements(id) ON DELETE CASCADE,
    instance       INTEGER NOT NULL DEFAULT 1,
    awarded_at     TEXT NOT NULL,
    UNIQUE (user_id, achievement_id, instance)
);

CREATE INDEX IF NOT EXISTS wiki_canvis_object_idx   ON wiki_canvis(object_type, object_id);
CREATE INDEX IF NOT EXISTS wiki_canvis_state_idx    ON wiki_canvis(moderation_state);
CREATE INDEX IF NOT EXISTS user_activity_user_idx   ON user_activity(user_id);
CREATE INDEX IF NOT EXISTS user_activity_object_idx ON user_activity(object_type, object_id);
CREATE INDEX IF NOT EXISTS persones_cognom1_idx     ON persones(cognom1);
CREATE INDEX IF NOT EXISTS persones_cognom2_idx     ON persones(cognom2);
CREATE INDEX IF NOT EXISTS transcripcio_canvis_idx  ON transcripcions_raw_canvis(transcripcio_id);

PRAGMA user_version = 1;
";
