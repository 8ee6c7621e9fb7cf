#![allow(dead_code)]

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use rusqlite::Connection;
use tempfile::TempDir;
use webbench_db::sqlite::SqliteStore;
use webbench_db::{PreparedQuery, Row, RowSink, Store, StoreError, Value};
use webbench_worker::{build, Worker, WorkerConfig};

pub const MOVIE_QUERY: &str = "\
SELECT id, image, title, year, description, avg_rating FROM movies WHERE id = ?1;
SELECT p.id, p.full_name, p.image FROM directors d JOIN persons p ON p.id = d.person_id \
WHERE d.movie_id = ?1 ORDER BY d.position;
SELECT p.id, p.full_name, p.image FROM actors a JOIN persons p ON p.id = a.person_id \
WHERE a.movie_id = ?1 ORDER BY a.position;
SELECT r.id, r.body, r.rating, u.id, u.name, u.image FROM reviews r JOIN users u ON u.id = r.user_id \
WHERE r.movie_id = ?1 ORDER BY r.created DESC";

pub const PERSON_QUERY: &str = "\
SELECT id, full_name, image, bio FROM persons WHERE id = ?1;
SELECT m.id, m.image, m.title, m.year, m.avg_rating FROM actors a JOIN movies m ON m.id = a.movie_id \
WHERE a.person_id = ?1 ORDER BY m.year;
SELECT m.id, m.image, m.title, m.year, m.avg_rating FROM directors d JOIN movies m ON m.id = d.movie_id \
WHERE d.person_id = ?1 ORDER BY m.year";

pub const USER_QUERY: &str = "\
SELECT u.id, u.name, u.image, r.id, r.body, r.rating, m.id, m.image, m.title, m.avg_rating \
FROM users u JOIN reviews r ON r.user_id = u.id JOIN movies m ON m.id = r.movie_id \
WHERE u.id = ?1 ORDER BY r.created DESC LIMIT 5";

const SCHEMA: &str = "
CREATE TABLE movies (
    id TEXT PRIMARY KEY,
    image TEXT,
    title TEXT NOT NULL,
    year INTEGER NOT NULL,
    description TEXT,
    avg_rating REAL NOT NULL
);
CREATE TABLE persons (
    id TEXT PRIMARY KEY,
    full_name TEXT NOT NULL,
    image TEXT,
    bio TEXT
);
CREATE TABLE directors (movie_id TEXT, person_id TEXT, position INTEGER);
CREATE TABLE actors (movie_id TEXT, person_id TEXT, position INTEGER);
CREATE TABLE users (id TEXT PRIMARY KEY, name TEXT NOT NULL, image TEXT);
CREATE TABLE reviews (
    id TEXT PRIMARY KEY,
    movie_id TEXT,
    user_id TEXT,
    body TEXT,
    rating INTEGER,
    created INTEGER
);

INSERT INTO movies VALUES
    ('tt0111161', 'shawshank.jpg', 'The Shawshank Redemption', 1994,
     'Two imprisoned men bond over a number of years.', 4.5),
    ('tt0068646', 'godfather.jpg', 'The Godfather', 1972, NULL, 4.25);
INSERT INTO persons VALUES
    ('nm0001104', 'Frank Darabont', 'darabont.jpg', 'Director and screenwriter.'),
    ('nm0000209', 'Tim Robbins', 'robbins.jpg', NULL),
    ('nm0000151', 'Morgan Freeman', 'freeman.jpg', 'Actor and narrator.'),
    ('nm0000338', 'Francis Ford Coppola', NULL, NULL),
    ('nm0000008', 'Marlon Brando', 'brando.jpg', NULL);
INSERT INTO directors VALUES
    ('tt0111161', 'nm0001104', 1),
    ('tt0068646', 'nm0000338', 1);
INSERT INTO actors VALUES
    ('tt0111161', 'nm0000151', 2),
    ('tt0111161', 'nm0000209', 1),
    ('tt0068646', 'nm0000008', 1);
INSERT INTO users VALUES
    ('u1', 'Ada', 'ada.png'),
    ('u2', 'Grace', 'grace.png');
INSERT INTO reviews VALUES
    ('r1', 'tt0111161', 'u1', 'Hope is a good thing.', 5, 2),
    ('r2', 'tt0111161', 'u2', 'Slow start, great ending.', 4, 1),
    ('r3', 'tt0068646', 'u1', 'An offer I could not refuse.', 5, 3);
";

/// A populated movie database in a temporary directory.
pub struct Fixture {
    _dir: TempDir,
    pub path: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("movies.db");
        let conn = Connection::open(&path).expect("create db");
        conn.execute_batch(SCHEMA).expect("load schema");
        drop(conn);
        Self { _dir: dir, path }
    }

    pub fn store(&self, concurrency: usize) -> Box<dyn Store> {
        Box::new(SqliteStore::open(&self.path, concurrency).expect("open store"))
    }

    pub fn worker(&self, kind: &str, query: &str, concurrency: usize) -> Worker {
        let config = WorkerConfig::new(query, concurrency).with_kind(kind);
        build(self.store(concurrency), &config).expect("build worker")
    }

    /// Runs a write against the database behind the worker's back.
    pub fn execute(&self, sql: &str) {
        let conn = Connection::open(&self.path).expect("open db");
        conn.execute_batch(sql).expect("execute");
    }
}

/// Counters shared between a [`StubStore`] and the test that built it.
#[derive(Default)]
pub struct StubStats {
    pub prepared: AtomicUsize,
    pub executed: AtomicUsize,
    pub closed_queries: AtomicUsize,
    pub closed_stores: AtomicUsize,
}

impl StubStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// In-memory store whose query text describes the rows it produces:
/// `<label> <column types> <row count> <delay ms>`, where each column type
/// is `t` (text), `i` (integer) or `r` (real).
///
/// Text cells read `<label>:<key>:<row>:<column>`, so every value names
/// the sub-query and the key it came from. The key `boom` fails every
/// query, and a query labelled `stuck` fails to close.
pub struct StubStore {
    pub stats: Arc<StubStats>,
}

impl StubStore {
    pub fn new() -> (Self, Arc<StubStats>) {
        let stats = Arc::new(StubStats::default());
        (
            Self {
                stats: stats.clone(),
            },
            stats,
        )
    }
}

impl Store for StubStore {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn prepare(&self, text: &str) -> webbench_db::Result<Box<dyn PreparedQuery>> {
        let bad = |message: &str| StoreError::Prepare {
            query: text.to_string(),
            message: message.to_string(),
        };
        let fields: Vec<&str> = text.split_whitespace().collect();
        let [label, columns, rows, delay] = fields.as_slice() else {
            return Err(bad("expected `<label> <columns> <rows> <delay>`"));
        };
        self.stats.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubQuery {
            text: text.to_string(),
            label: label.to_string(),
            columns: columns.chars().collect(),
            rows: rows.parse().map_err(|_| bad("row count"))?,
            delay: Duration::from_millis(delay.parse().map_err(|_| bad("delay"))?),
            stats: self.stats.clone(),
        }))
    }

    fn close(&self) -> webbench_db::Result<()> {
        self.stats.closed_stores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct StubQuery {
    text: String,
    label: String,
    columns: Vec<char>,
    rows: usize,
    delay: Duration,
    stats: Arc<StubStats>,
}

impl PreparedQuery for StubQuery {
    fn text(&self) -> &str {
        &self.text
    }

    fn for_each_row(&self, key: &str, sink: &mut RowSink<'_>) -> webbench_db::Result<()> {
        self.stats.executed.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        if key == "boom" {
            return Err(StoreError::Query(format!("{}: connection reset", self.label)));
        }
        for row in 0..self.rows {
            let values: Vec<Value> = self
                .columns
                .iter()
                .enumerate()
                .map(|(column, kind)| match kind {
                    'i' => Value::Integer(row as i64 + 1),
                    'r' => Value::Real(0.5),
                    _ => Value::Text(format!("{}:{key}:{row}:{column}", self.label)),
                })
                .collect();
            if sink(&Row::new(&values))? == ControlFlow::Break(()) {
                break;
            }
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> webbench_db::Result<()> {
        self.stats.closed_queries.fetch_add(1, Ordering::SeqCst);
        if self.label == "stuck" {
            return Err(StoreError::Close("stuck: connection still busy".to_string()));
        }
        Ok(())
    }
}

/// Composite movie query for [`StubStore`] with per-slot delays.
pub fn stub_movie_query(delays: [u64; 4]) -> String {
    format!(
        "detail tttitr 2 {}; directors ttt 2 {}; cast ttt 3 {}; reviews ttittt 2 {}",
        delays[0], delays[1], delays[2], delays[3]
    )
}

pub fn stub_user_query(delay: u64) -> String {
    format!("users tttttitttr 3 {delay}")
}
