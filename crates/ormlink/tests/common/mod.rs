//! Models and helpers shared by the integration tests.

#![allow(dead_code)]

use ormlink::prelude::*;
use ormlink::{Dialect, Row, Scanner};
use ormlink_sqlite::SqliteConnection;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Model, Debug, Clone, Default, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub age: i32,
    pub created_at: i64,
    pub updated_at: i64,
    pub company_id: Option<i64>,
    #[ormlink(association)]
    pub company: Option<Company>,
    #[ormlink(association)]
    pub emails: Vec<Email>,
    #[ormlink(many2many = "user_languages")]
    pub languages: Vec<Language>,
    #[ormlink(polymorphic = "Owner")]
    pub toys: Vec<Toy>,
}

#[derive(Model, Debug, Clone, Default, PartialEq)]
pub struct Email {
    pub id: i64,
    pub user_id: i64,
    pub email: String,
}

#[derive(Model, Debug, Clone, Default, PartialEq)]
pub struct Language {
    pub id: i64,
    #[ormlink(size = 32)]
    pub name: String,
}

#[derive(Model, Debug, Clone, Default, PartialEq)]
pub struct Company {
    pub id: i64,
    pub name: String,
}

#[derive(Model, Debug, Clone, Default, PartialEq)]
pub struct Toy {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub owner_type: String,
}

#[derive(Model, Debug, Clone, Default, PartialEq)]
pub struct Pet {
    pub id: i64,
    pub name: String,
    #[ormlink(polymorphic = "Owner", polymorphic_value = "pet")]
    pub toys: Vec<Toy>,
}

#[derive(Model, Debug, Clone, Default, PartialEq)]
pub struct Note {
    pub id: i64,
    pub body: String,
    pub deleted_at: Option<i64>,
}

#[derive(Model, Debug, Clone, Default, PartialEq)]
pub struct Member {
    pub id: i64,
    pub name: String,
    #[ormlink(association)]
    pub profile: Option<Profile>,
}

#[derive(Model, Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub id: i64,
    pub member_id: i64,
    pub bio: String,
    #[ormlink(scanner)]
    pub tags: Tags,
}

/// Labels kept in one comma-separated text column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tags(pub Vec<String>);

impl Tags {
    pub fn of(labels: &[&str]) -> Self {
        Self(labels.iter().map(|l| (*l).to_string()).collect())
    }
}

impl Scanner for Tags {
    fn scan(&mut self, value: Value) -> Result<()> {
        self.0 = match value {
            Value::Null => Vec::new(),
            Value::Text(text) if text.is_empty() => Vec::new(),
            Value::Text(text) => text.split(',').map(str::to_string).collect(),
            other => return Err(Error::Custom(format!("tags from {}", other.type_name()))),
        };
        Ok(())
    }

    fn value(&self) -> Value {
        Value::from(self.0.join(","))
    }
}

pub fn user(name: &str, age: i32) -> User {
    User {
        name: name.to_string(),
        age,
        ..User::default()
    }
}

/// A handle over a fresh in-memory database with every test table created.
pub fn sqlite_db() -> Db {
    let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
    let db = Db::open(conn, Sqlite);
    db.create_table::<User>().expect("create users");
    db.create_table::<Email>().expect("create emails");
    db.create_table::<Language>().expect("create languages");
    db.create_table::<Company>().expect("create companies");
    db.create_table::<Toy>().expect("create toys");
    db.create_table::<Pet>().expect("create pets");
    db.create_table::<Note>().expect("create notes");
    db.create_table::<Member>().expect("create members");
    db.create_table::<Profile>().expect("create profiles");
    db
}

pub fn count_rows(db: &Db, sql: &str, args: Vec<Value>) -> i64 {
    let rows = db.query(sql, args).expect("count query");
    rows[0].get_as::<i64>(0).expect("count value")
}

/// Executor that records every call and returns canned results.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
    depth: Arc<AtomicUsize>,
}

impl Recorder {
    /// Every call in order; transaction control shows up as
    /// `BEGIN`/`COMMIT`/`ROLLBACK`.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("recorder lock")
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    /// Calls that sent SQL to the store, with their arguments.
    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.calls
            .lock()
            .expect("recorder lock")
            .iter()
            .filter(|(sql, _)| !matches!(sql.as_str(), "BEGIN" | "COMMIT" | "ROLLBACK"))
            .cloned()
            .collect()
    }

    fn push(&self, sql: &str, params: &[Value]) {
        self.calls
            .lock()
            .expect("recorder lock")
            .push((sql.to_string(), params.to_vec()));
    }
}

impl Executor for Recorder {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.push(sql, params);
        Ok(1)
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.push(sql, params);
        Ok(Vec::new())
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        self.push(sql, params);
        Ok(7)
    }

    fn begin(&self) -> Result<()> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        self.push("BEGIN", &[]);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.depth.fetch_sub(1, Ordering::SeqCst);
        self.push("COMMIT", &[]);
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.depth.fetch_sub(1, Ordering::SeqCst);
        self.push("ROLLBACK", &[]);
        Ok(())
    }

    fn transaction_depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

/// A handle over a [`Recorder`], plus the recorder to inspect.
pub fn recording_db() -> (Db, Recorder) {
    let recorder = Recorder::default();
    let db = Db::new(
        Arc::new(recorder.clone()),
        Arc::new(Sqlite) as Arc<dyn Dialect>,
        DbConfig::default(),
    );
    (db, recorder)
}
