//! BackyardAI (formerly Faraday) desktop database as a data source.
//!
//! Read-only.  Every call opens its own connection and drops it before
//! returning, so a `BackyardDb` is just a path and can be shared freely
//! between worker threads.

use indexmap::IndexMap;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{CharacterDataSource, RawRecord, SourceError};

const LOOKUP_BY_IMAGE: &str = "
    SELECT ccv.id, ccv.name, ccv.displayName, ccv.persona,
           c.greetingDialogue, c.customDialogue, c.context
    FROM AppImage ai
    JOIN _AppImageToCharacterConfigVersion aitc ON ai.id = aitc.A
    JOIN CharacterConfigVersion ccv ON aitc.B = ccv.id
    LEFT JOIN CharacterConfig cc ON ccv.characterConfigId = cc.id
    LEFT JOIN _CharacterConfigToGroupConfig ccgc ON cc.id = ccgc.A
    LEFT JOIN GroupConfig gc ON ccgc.B = gc.id
    LEFT JOIN Chat c ON gc.id = c.groupConfigId
    WHERE ai.imageUrl LIKE ?1
    ORDER BY ccv.createdAt DESC, c.createdAt IS NULL, c.createdAt ASC, c.id
    LIMIT 1";

const LOREBOOK_ITEMS: &str = "
    SELECT ali.key, ali.value
    FROM AppCharacterLorebookItem ali
    JOIN _AppCharacterLorebookItemToCharacterConfigVersion altc ON ali.id = altc.A
    WHERE altc.B = ?1";

/// One row per character version and image.  Chat fields come from the
/// character's earliest chat only.
const ALL_CHARACTERS: &str = "
    WITH first_chat AS (
        SELECT ccgc.A AS configId, c.greetingDialogue, c.customDialogue, c.context,
               ROW_NUMBER() OVER (PARTITION BY ccgc.A ORDER BY c.createdAt ASC, c.id) AS chatOrder
        FROM _CharacterConfigToGroupConfig ccgc
        JOIN GroupConfig gc ON ccgc.B = gc.id
        JOIN Chat c ON gc.id = c.groupConfigId
    )
    SELECT ccv.id, ccv.name, ccv.displayName, ccv.persona, ai.imageUrl,
           fc.greetingDialogue, fc.customDialogue, fc.context
    FROM CharacterConfig cc
    JOIN CharacterConfigVersion ccv ON cc.id = ccv.characterConfigId
    LEFT JOIN _AppImageToCharacterConfigVersion aitc ON ccv.id = aitc.B
    LEFT JOIN AppImage ai ON aitc.A = ai.id
    LEFT JOIN first_chat fc ON fc.configId = cc.id AND fc.chatOrder = 1
    WHERE cc.isUserControlled = 0 AND cc.isDefaultUserCharacter = 0
    ORDER BY ccv.name, ccv.id";

/// Handle on a `db.sqlite` file.
#[derive(Debug, Clone)]
pub struct BackyardDb {
    path: PathBuf,
}

impl BackyardDb {
    /// Fails if the file does not exist; the schema is only checked on
    /// first query.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let path = path.into();
        if !path.is_file() {
            return Err(SourceError::Unavailable(format!(
                "database not found at {}",
                path.display()
            )));
        }
        Ok(Self { path })
    }

    /// Per-platform location used by the desktop app.
    pub fn default_path() -> Option<PathBuf> {
        let home = || std::env::var_os("HOME").map(PathBuf::from);
        if cfg!(windows) {
            std::env::var_os("APPDATA").map(|d| PathBuf::from(d).join("faraday").join("db.sqlite"))
        } else if cfg!(target_os = "macos") {
            home().map(|h| h.join("Library/Application Support/faraday/db.sqlite"))
        } else {
            home().map(|h| h.join(".local/share/faraday/db.sqlite"))
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, SourceError> {
        Ok(Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?)
    }

    /// Every character that is not the user's own persona, one record per
    /// character version.  `image_path` is `None` when the store has no
    /// image or the file no longer exists.
    pub fn characters(&self) -> Result<Vec<RawRecord>, SourceError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(ALL_CHARACTERS)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                RawRecord {
                    name:             row.get(1)?,
                    display_name:     row.get(2)?,
                    persona:          row.get(3)?,
                    image_path:       row.get::<_, Option<String>>(4)?.map(image_url_to_path),
                    greeting:         row.get(5)?,
                    example_dialogue: row.get(6)?,
                    scenario:         row.get(7)?,
                    lorebook:         IndexMap::new(),
                },
            ))
        })?;

        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for row in rows {
            let (version_id, mut record) = row?;
            if !seen.insert(version_id.clone()) {
                continue;
            }
            if let Some(path) = record.image_path.take() {
                if path.is_file() {
                    record.image_path = Some(path);
                } else {
                    debug!(image = %path.display(), "character image missing");
                }
            }
            record.lorebook = lorebook(&conn, &version_id)?;
            records.push(record);
        }
        Ok(records)
    }
}

impl CharacterDataSource for BackyardDb {
    fn lookup(&self, filename: &str) -> Result<Option<RawRecord>, SourceError> {
        let conn = self.connect()?;
        let pattern = format!("%{filename}");
        let found = conn
            .query_row(LOOKUP_BY_IMAGE, params![pattern], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    RawRecord {
                        name:             row.get(1)?,
                        display_name:     row.get(2)?,
                        persona:          row.get(3)?,
                        greeting:         row.get(4)?,
                        example_dialogue: row.get(5)?,
                        scenario:         row.get(6)?,
                        lorebook:         IndexMap::new(),
                        image_path:       None,
                    },
                ))
            })
            .optional()?;

        let Some((version_id, mut record)) = found else {
            return Ok(None);
        };
        debug!(filename, version = %version_id, "character found in database");
        record.lorebook = lorebook(&conn, &version_id)?;
        Ok(Some(record))
    }
}

fn lorebook(conn: &Connection, version_id: &str) -> Result<IndexMap<String, String>, SourceError> {
    let mut stmt = conn.prepare(LOREBOOK_ITEMS)?;
    let rows = stmt.query_map(params![version_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut book = IndexMap::new();
    for row in rows {
        let (key, value) = row?;
        book.insert(key, value);
    }
    Ok(book)
}

fn image_url_to_path(url: String) -> PathBuf {
    match url.strip_prefix("file://") {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SCHEMA: &str = "
        CREATE TABLE CharacterConfig (id TEXT PRIMARY KEY, isUserControlled INTEGER, isDefaultUserCharacter INTEGER);
        CREATE TABLE CharacterConfigVersion (id TEXT PRIMARY KEY, characterConfigId TEXT, name TEXT,
            displayName TEXT, persona TEXT, createdAt INTEGER);
        CREATE TABLE AppImage (id TEXT PRIMARY KEY, imageUrl TEXT);
        CREATE TABLE _AppImageToCharacterConfigVersion (A TEXT, B TEXT);
        CREATE TABLE GroupConfig (id TEXT PRIMARY KEY, name TEXT);
        CREATE TABLE _CharacterConfigToGroupConfig (A TEXT, B TEXT);
        CREATE TABLE Chat (id TEXT PRIMARY KEY, groupConfigId TEXT, greetingDialogue TEXT,
            customDialogue TEXT, context TEXT, createdAt INTEGER);
        CREATE TABLE AppCharacterLorebookItem (id TEXT PRIMARY KEY, key TEXT, value TEXT);
        CREATE TABLE _AppCharacterLorebookItemToCharacterConfigVersion (A TEXT, B TEXT);";

    fn fixture(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("db.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn.execute_batch(
            "INSERT INTO CharacterConfig VALUES ('cc1', 0, 0), ('me', 1, 1);
             INSERT INTO CharacterConfigVersion VALUES
                ('v1', 'cc1', 'Kai', 'Kai K.', 'A pilot.', 1),
                ('vme', 'me', 'User', NULL, NULL, 1);
             INSERT INTO AppImage VALUES ('img1', 'file:///missing/dir/abc123.png');
             INSERT INTO _AppImageToCharacterConfigVersion VALUES ('img1', 'v1');
             INSERT INTO GroupConfig VALUES ('g1', 'chat');
             INSERT INTO _CharacterConfigToGroupConfig VALUES ('cc1', 'g1');
             INSERT INTO Chat VALUES ('c1', 'g1', 'Hey {user}', '{user}: hi', 'On the ship', 1);
             INSERT INTO AppCharacterLorebookItem VALUES ('l1', 'Wren', 'The ship');
             INSERT INTO _AppCharacterLorebookItemToCharacterConfigVersion VALUES ('l1', 'v1');",
        )
        .unwrap();
        path
    }

    #[test]
    fn test_lookup_by_image_filename() {
        let dir = TempDir::new().unwrap();
        let db = BackyardDb::open(fixture(&dir)).unwrap();

        let record = db.lookup("abc123.png").unwrap().unwrap();
        assert_eq!(record.name.as_deref(), Some("Kai"));
        assert_eq!(record.display_name.as_deref(), Some("Kai K."));
        assert_eq!(record.greeting.as_deref(), Some("Hey {user}"));
        assert_eq!(record.scenario.as_deref(), Some("On the ship"));
        assert_eq!(record.lorebook["Wren"], "The ship");

        assert!(db.lookup("nope.png").unwrap().is_none());
    }

    #[test]
    fn test_characters_skips_user_personas() {
        let dir = TempDir::new().unwrap();
        let db = BackyardDb::open(fixture(&dir)).unwrap();

        let records = db.characters().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name.as_deref(), Some("Kai"));
        assert_eq!(records[0].example_dialogue.as_deref(), Some("{user}: hi"));
        // The image path points nowhere on this machine.
        assert!(records[0].image_path.is_none());
        assert_eq!(records[0].lorebook.len(), 1);
    }

    #[test]
    fn test_chat_fields_come_from_earliest_chat() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir);
        let conn = Connection::open(&path).unwrap();
        // Created later, but every column sorts after the first chat's.
        conn.execute_batch(
            "DELETE FROM Chat;
             INSERT INTO Chat VALUES
                ('c1', 'g1', 'Alpha greeting', 'zz first dialogue', 'A ctx', 1),
                ('c2', 'g1', 'Zulu greeting', 'aa later dialogue', 'Z ctx', 2);
             INSERT INTO AppImage VALUES ('img2', 'file:///missing/dir/abc456.png');
             INSERT INTO _AppImageToCharacterConfigVersion VALUES ('img2', 'v1');",
        )
        .unwrap();
        drop(conn);

        let db = BackyardDb::open(path).unwrap();
        let records = db.characters().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].greeting.as_deref(), Some("Alpha greeting"));
        assert_eq!(records[0].example_dialogue.as_deref(), Some("zz first dialogue"));
        assert_eq!(records[0].scenario.as_deref(), Some("A ctx"));

        let found = db.lookup("abc123.png").unwrap().unwrap();
        assert_eq!(found.greeting.as_deref(), Some("Alpha greeting"));
        assert_eq!(found.scenario.as_deref(), Some("A ctx"));
    }

    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            BackyardDb::open(dir.path().join("absent.sqlite")),
            Err(SourceError::Unavailable(_))
        ));
    }
}
