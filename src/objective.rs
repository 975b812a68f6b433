//! This file defines the `Objective` type, a savings goal with a target amount
//! and an accumulating saved amount, and the clamped deposit arithmetic.

use std::{fmt::Display, str::FromStr};

use rusqlite::{
    Connection, Row, ToSql,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};

use crate::{Error, database_id::DatabaseID, user::UserID};

/// The error returned when parsing an unrecognized objective status.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("\"{0}\" is not a recognized objective status")]
pub struct ParseObjectiveStatusError(String);

/// Whether a savings objective is still being saved towards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveStatus {
    /// The objective has not reached its target yet.
    Active,
    /// The saved amount has reached the target.
    Completed,
}

impl ObjectiveStatus {
    /// The string stored in the database for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectiveStatus::Active => "active",
            ObjectiveStatus::Completed => "completed",
        }
    }
}

impl Display for ObjectiveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectiveStatus {
    type Err = ParseObjectiveStatusError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "active" => Ok(ObjectiveStatus::Active),
            "completed" => Ok(ObjectiveStatus::Completed),
            other => Err(ParseObjectiveStatusError(other.to_owned())),
        }
    }
}

impl FromSql for ObjectiveStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error: ParseObjectiveStatusError| FromSqlError::Other(Box::new(error)))
    }
}

impl ToSql for ObjectiveStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// A savings goal, e.g. "Holiday fund".
///
/// The saved amount never exceeds the target and never goes below zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    /// The ID of the objective.
    pub id: DatabaseID,
    /// The user that owns the objective.
    pub user_id: UserID,
    /// A short display name, used in goal notifications.
    pub name: String,
    /// The amount the user wants to save.
    pub target_amount: f64,
    /// The amount saved so far.
    pub current_amount: f64,
    /// Whether the objective is still being saved towards.
    pub status: ObjectiveStatus,
}

impl Objective {
    /// How far along the objective is, as a percentage of the target.
    pub fn progress_percent(&self) -> f64 {
        self.current_amount / self.target_amount * 100.0
    }
}

/// The saved amount after applying a deposit to an objective.
///
/// Deposits cannot push the saved amount above the target: any excess is
/// silently clamped rather than rejected.
pub fn apply_deposit(current_amount: f64, target_amount: f64, deposit: f64) -> f64 {
    (current_amount + deposit).min(target_amount)
}

/// Create the objective table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_objective_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS objective (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                target_amount REAL NOT NULL,
                current_amount REAL NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active',
                FOREIGN KEY(user_id) REFERENCES user(id) ON UPDATE CASCADE ON DELETE CASCADE
                )",
        (),
    )?;

    Ok(())
}

/// Map a database row to an [Objective].
fn map_objective_row(row: &Row) -> Result<Objective, rusqlite::Error> {
    Ok(Objective {
        id: row.get(0)?,
        user_id: UserID::new(row.get(1)?),
        name: row.get(2)?,
        target_amount: row.get(3)?,
        current_amount: row.get(4)?,
        status: row.get(5)?,
    })
}

/// Create a savings objective in the database.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn create_objective(
    user_id: UserID,
    name: &str,
    target_amount: f64,
    connection: &Connection,
) -> Result<Objective, Error> {
    connection.execute(
        "INSERT INTO objective (user_id, name, target_amount) VALUES (?1, ?2, ?3)",
        (user_id.as_i64(), name, target_amount),
    )?;

    let id = connection.last_insert_rowid();

    Ok(Objective {
        id,
        user_id,
        name: name.to_owned(),
        target_amount,
        current_amount: 0.0,
        status: ObjectiveStatus::Active,
    })
}

/// Retrieve an objective in the database by `id`.
///
/// # Errors
/// This function will return a [Error::NotFound] if `id` does not refer to a
/// valid objective, or a [Error::SqlError] if there is some other SQL error.
pub fn get_objective(id: DatabaseID, connection: &Connection) -> Result<Objective, Error> {
    connection
        .prepare(
            "SELECT id, user_id, name, target_amount, current_amount, status
             FROM objective WHERE id = :id",
        )?
        .query_row(&[(":id", &id)], map_objective_row)
        .map_err(|error| error.into())
}

/// Retrieve a user's objectives that are still active.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is some SQL error.
pub fn get_active_objectives(
    user_id: UserID,
    connection: &Connection,
) -> Result<Vec<Objective>, Error> {
    connection
        .prepare(
            "SELECT id, user_id, name, target_amount, current_amount, status
             FROM objective WHERE user_id = :user_id AND status = 'active'
             ORDER BY id",
        )?
        .query_map(&[(":user_id", &user_id.as_i64())], map_objective_row)?
        .map(|maybe_objective| maybe_objective.map_err(|error| error.into()))
        .collect()
}

/// Apply a deposit to an objective, clamping the saved amount to the target.
///
/// The objective is marked completed when the deposit reaches the target.
/// Returns the updated objective.
///
/// # Errors
/// This function will return an error if there is an SQL error or if the
/// objective does not exist.
pub fn record_deposit(
    id: DatabaseID,
    deposit: f64,
    connection: &Connection,
) -> Result<Objective, Error> {
    let mut objective = get_objective(id, connection)?;

    objective.current_amount =
        apply_deposit(objective.current_amount, objective.target_amount, deposit);
    if objective.current_amount >= objective.target_amount {
        objective.status = ObjectiveStatus::Completed;
    }

    connection.execute(
        "UPDATE objective SET current_amount = ?1, status = ?2 WHERE id = ?3",
        (objective.current_amount, objective.status, id),
    )?;

    Ok(objective)
}

/// Mark an objective as completed.
///
/// Used by the goal-progress rule once the saved amount has reached the
/// target, so that the objective is not evaluated (or notified about) again.
///
/// # Errors
/// This function will return an error if there is an SQL error or if the
/// objective does not exist.
pub fn complete_objective(id: DatabaseID, connection: &Connection) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE objective SET status = 'completed' WHERE id = ?1",
        [id],
    )?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

#[cfg(test)]
mod apply_deposit_tests {
    use super::apply_deposit;

    #[test]
    fn deposit_below_target_accumulates() {
        assert_eq!(apply_deposit(10.0, 100.0, 25.0), 35.0);
    }

    #[test]
    fn deposit_over_target_is_clamped() {
        assert_eq!(apply_deposit(90.0, 100.0, 50.0), 100.0);
    }

    #[test]
    fn deposit_exactly_reaching_target() {
        assert_eq!(apply_deposit(90.0, 100.0, 10.0), 100.0);
    }
}
