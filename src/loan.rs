//! This file defines the `Loan` type, a lent-or-borrowed amount tracked via a
//! decreasing remaining balance, and the clamped payment arithmetic.

use std::{fmt::Display, str::FromStr};

use rusqlite::{
    Connection, Row, ToSql,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};

use crate::{Error, database_id::DatabaseID, user::UserID};

/// The error returned when parsing an unrecognized loan direction or status.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("\"{0}\" is not a recognized loan {1}")]
pub struct ParseLoanFieldError(String, &'static str);

/// Whether the user lent the money out or borrowed it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LoanDirection {
    /// The user lent money to someone else.
    Lent,
    /// The user borrowed money from someone else.
    Borrowed,
}

impl LoanDirection {
    /// The string stored in the database for this direction.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanDirection::Lent => "lent",
            LoanDirection::Borrowed => "borrowed",
        }
    }
}

impl FromStr for LoanDirection {
    type Err = ParseLoanFieldError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "lent" => Ok(LoanDirection::Lent),
            "borrowed" => Ok(LoanDirection::Borrowed),
            other => Err(ParseLoanFieldError(other.to_owned(), "direction")),
        }
    }
}

impl FromSql for LoanDirection {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error: ParseLoanFieldError| FromSqlError::Other(Box::new(error)))
    }
}

impl ToSql for LoanDirection {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// How much of a loan has been repaid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    /// No payments have been recorded yet.
    Pending,
    /// Some, but not all, of the loan has been repaid.
    Partial,
    /// The remaining balance has hit zero.
    Paid,
}

impl LoanStatus {
    /// The string stored in the database for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Partial => "partial",
            LoanStatus::Paid => "paid",
        }
    }
}

impl Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanStatus {
    type Err = ParseLoanFieldError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "pending" => Ok(LoanStatus::Pending),
            "partial" => Ok(LoanStatus::Partial),
            "paid" => Ok(LoanStatus::Paid),
            other => Err(ParseLoanFieldError(other.to_owned(), "status")),
        }
    }
}

impl FromSql for LoanStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error: ParseLoanFieldError| FromSqlError::Other(Box::new(error)))
    }
}

impl ToSql for LoanStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// Money lent to or borrowed from someone else, repaid over time.
///
/// The remaining balance never exceeds the original amount and never goes
/// below zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    /// The ID of the loan.
    pub id: DatabaseID,
    /// The user that owns the loan.
    pub user_id: UserID,
    /// Whether the user lent or borrowed the money.
    pub direction: LoanDirection,
    /// The original amount of the loan.
    pub amount: f64,
    /// How much is still owed.
    pub amount_remaining: f64,
    /// How much of the loan has been repaid.
    pub status: LoanStatus,
}

/// The remaining balance and status after applying a payment to a loan.
///
/// Validating that a payment does not exceed the remaining balance is the
/// caller's responsibility, but the clamp to zero holds regardless. The
/// status becomes [LoanStatus::Paid] at zero, otherwise [LoanStatus::Partial].
pub fn apply_payment(amount_remaining: f64, payment: f64) -> (f64, LoanStatus) {
    let new_remaining = (amount_remaining - payment).max(0.0);
    let status = if new_remaining == 0.0 {
        LoanStatus::Paid
    } else {
        LoanStatus::Partial
    };

    (new_remaining, status)
}

/// Create the loan table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_loan_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS loan (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                direction TEXT NOT NULL,
                amount REAL NOT NULL,
                amount_remaining REAL NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                FOREIGN KEY(user_id) REFERENCES user(id) ON UPDATE CASCADE ON DELETE CASCADE
                )",
        (),
    )?;

    Ok(())
}

/// Map a database row to a [Loan].
fn map_loan_row(row: &Row) -> Result<Loan, rusqlite::Error> {
    Ok(Loan {
        id: row.get(0)?,
        user_id: UserID::new(row.get(1)?),
        direction: row.get(2)?,
        amount: row.get(3)?,
        amount_remaining: row.get(4)?,
        status: row.get(5)?,
    })
}

/// Create a loan in the database. The remaining balance starts at the full
/// amount.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn create_loan(
    user_id: UserID,
    direction: LoanDirection,
    amount: f64,
    connection: &Connection,
) -> Result<Loan, Error> {
    connection.execute(
        "INSERT INTO loan (user_id, direction, amount, amount_remaining)
         VALUES (?1, ?2, ?3, ?3)",
        (user_id.as_i64(), direction, amount),
    )?;

    let id = connection.last_insert_rowid();

    Ok(Loan {
        id,
        user_id,
        direction,
        amount,
        amount_remaining: amount,
        status: LoanStatus::Pending,
    })
}

/// Retrieve a loan in the database by `id`.
///
/// # Errors
/// This function will return a [Error::NotFound] if `id` does not refer to a
/// valid loan, or a [Error::SqlError] if there is some other SQL error.
pub fn get_loan(id: DatabaseID, connection: &Connection) -> Result<Loan, Error> {
    connection
        .prepare(
            "SELECT id, user_id, direction, amount, amount_remaining, status
             FROM loan WHERE id = :id",
        )?
        .query_row(&[(":id", &id)], map_loan_row)
        .map_err(|error| error.into())
}

/// Apply a payment to a loan, clamping the remaining balance to zero.
///
/// Returns the updated loan.
///
/// # Errors
/// This function will return an error if there is an SQL error or if the loan
/// does not exist.
pub fn record_payment(id: DatabaseID, payment: f64, connection: &Connection) -> Result<Loan, Error> {
    let mut loan = get_loan(id, connection)?;

    let (new_remaining, status) = apply_payment(loan.amount_remaining, payment);
    loan.amount_remaining = new_remaining;
    loan.status = status;

    connection.execute(
        "UPDATE loan SET amount_remaining = ?1, status = ?2 WHERE id = ?3",
        (loan.amount_remaining, loan.status, id),
    )?;

    Ok(loan)
}
