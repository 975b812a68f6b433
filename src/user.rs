//! Code for creating the user table and fetching users from the database.
//!
//! User management proper (sign up, authentication) lives outside this crate.
//! The engines only need a registry of who exists so that the notification
//! rules can be evaluated for every user.

use std::fmt::Display;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::Error;

/// A newtype wrapper for integer user IDs.
///
/// This helps disambiguate user IDs from other types of IDs, leading to better
/// compile time errors, and more flexible generics that can have distinct
/// implementations for multiple ID types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct UserID(i64);

impl UserID {
    /// Create a new user ID.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Cast the user ID to a 64 bit integer.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Display for UserID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A user of the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// The user's ID in the application database.
    pub id: UserID,
    /// The user's display name.
    pub name: String,
}

/// Create the user table.
///
/// # Errors
///
/// This function will return an error if the SQL query failed.
pub fn create_user_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS user (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL
                )",
        (),
    )?;

    Ok(())
}

/// Create and insert a new user into the database.
///
/// # Errors
///
/// Returns a [Error::SqlError] if an SQL related error occurred.
pub fn create_user(name: &str, connection: &Connection) -> Result<User, Error> {
    connection.execute("INSERT INTO user (name) VALUES (?1)", (name,))?;

    let id = UserID::new(connection.last_insert_rowid());

    Ok(User {
        id,
        name: name.to_owned(),
    })
}

/// Retrieve the IDs of every user in the database.
///
/// # Errors
///
/// Returns a [Error::SqlError] if an SQL related error occurred.
pub fn get_all_user_ids(connection: &Connection) -> Result<Vec<UserID>, Error> {
    connection
        .prepare("SELECT id FROM user ORDER BY id")?
        .query_map([], |row| row.get(0).map(UserID::new))?
        .map(|maybe_id| maybe_id.map_err(|error| error.into()))
        .collect()
}

#[cfg(test)]
mod user_tests {
    use rusqlite::Connection;

    use super::{create_user, create_user_table, get_all_user_ids};

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_user_table(&conn).unwrap();
        conn
    }

    #[test]
    fn create_user_succeeds() {
        let conn = get_test_connection();

        let user = create_user("Alice", &conn).unwrap();

        assert_eq!(user.name, "Alice");
        assert_eq!(user.id.as_i64(), 1);
    }

    #[test]
    fn get_all_user_ids_returns_every_user() {
        let conn = get_test_connection();

        let alice = create_user("Alice", &conn).unwrap();
        let bob = create_user("Bob", &conn).unwrap();

        let ids = get_all_user_ids(&conn).unwrap();

        assert_eq!(ids, vec![alice.id, bob.id]);
    }

    #[test]
    fn get_all_user_ids_returns_empty_vec_for_no_users() {
        let conn = get_test_connection();

        assert_eq!(get_all_user_ids(&conn).unwrap(), vec![]);
    }
}
