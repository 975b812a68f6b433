//! This file defines the `Transaction` type, the core type of the ledger, and
//! the queries that the notification rules aggregate over.

use std::{fmt::Display, ops::RangeInclusive, str::FromStr};

use rusqlite::{
    Connection, Row, ToSql,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};
use time::Date;

use crate::{Error, database_id::DatabaseID, user::UserID};

/// The error returned when parsing an unrecognized transaction kind.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("\"{0}\" is not a recognized transaction kind")]
pub struct ParseTransactionKindError(String);

/// Whether a transaction brought money in or took money out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Money earned, e.g. wages.
    Income,
    /// Money spent, e.g. groceries.
    Expense,
}

impl TransactionKind {
    /// The string stored in the database for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Income => "income",
            TransactionKind::Expense => "expense",
        }
    }
}

impl Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = ParseTransactionKindError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "income" => Ok(TransactionKind::Income),
            "expense" => Ok(TransactionKind::Expense),
            other => Err(ParseTransactionKindError(other.to_owned())),
        }
    }
}

impl FromSql for TransactionKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error: ParseTransactionKindError| FromSqlError::Other(Box::new(error)))
    }
}

impl ToSql for TransactionKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// An expense or income, i.e. an event where money was either spent or earned.
///
/// Transactions are immutable once created; the only permitted change is
/// deletion by their owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// The ID of the transaction.
    pub id: DatabaseID,
    /// The user that owns the transaction.
    pub user_id: UserID,
    /// Whether the transaction is income or an expense.
    pub kind: TransactionKind,
    /// The amount of money spent or earned, always non-negative.
    pub amount: f64,
    /// A user-defined category describing the type of the transaction.
    pub category: String,
    /// A text description of what the transaction was for.
    pub description: String,
    /// How the transaction was paid, e.g. "cash" or "card".
    pub payment_method: Option<String>,
    /// When the transaction happened.
    pub date: Date,
    /// Whether the transaction was materialized from a recurring rule.
    pub is_recurring: bool,
    /// The recurring rule that materialized this transaction, if any.
    pub recurring_id: Option<DatabaseID>,
}

/// The data needed to create a new transaction.
///
/// Used both by the manual-entry collaborator and by the recurrence scheduler
/// when it materializes a rule.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    /// The user that will own the transaction.
    pub user_id: UserID,
    /// Whether the transaction is income or an expense.
    pub kind: TransactionKind,
    /// The amount of money spent or earned.
    pub amount: f64,
    /// A user-defined category describing the type of the transaction.
    pub category: String,
    /// A text description of what the transaction was for.
    pub description: String,
    /// How the transaction was paid.
    pub payment_method: Option<String>,
    /// When the transaction happened.
    pub date: Date,
    /// The recurring rule that materialized this transaction, if any.
    /// `Some` implies the transaction is recurring.
    pub recurring_id: Option<DatabaseID>,
}

/// The income and expense totals over some period.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TransactionSummary {
    /// Total income over the period.
    pub income: f64,
    /// Total expenses over the period.
    pub expense: f64,
}

impl TransactionSummary {
    /// Income minus expenses.
    pub fn net(&self) -> f64 {
        self.income - self.expense
    }
}

/// Create the transaction table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS \"transaction\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                amount REAL NOT NULL,
                category TEXT NOT NULL,
                description TEXT NOT NULL,
                payment_method TEXT,
                date TEXT NOT NULL,
                is_recurring INTEGER NOT NULL DEFAULT 0,
                recurring_id INTEGER,
                FOREIGN KEY(user_id) REFERENCES user(id) ON UPDATE CASCADE ON DELETE CASCADE,
                FOREIGN KEY(recurring_id) REFERENCES recurring_rule(id) ON DELETE SET NULL
                )",
        (),
    )?;

    Ok(())
}

/// Map a database row to a [Transaction].
fn map_transaction_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    Ok(Transaction {
        id: row.get(0)?,
        user_id: UserID::new(row.get(1)?),
        kind: row.get(2)?,
        amount: row.get(3)?,
        category: row.get(4)?,
        description: row.get(5)?,
        payment_method: row.get(6)?,
        date: row.get(7)?,
        is_recurring: row.get(8)?,
        recurring_id: row.get(9)?,
    })
}

/// Create a transaction in the database.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn create_transaction(
    new_transaction: NewTransaction,
    connection: &Connection,
) -> Result<Transaction, Error> {
    connection.execute(
        "INSERT INTO \"transaction\"
                (user_id, kind, amount, category, description, payment_method, date, is_recurring, recurring_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        (
            new_transaction.user_id.as_i64(),
            new_transaction.kind,
            new_transaction.amount,
            &new_transaction.category,
            &new_transaction.description,
            &new_transaction.payment_method,
            new_transaction.date,
            new_transaction.recurring_id.is_some(),
            new_transaction.recurring_id,
        ),
    )?;

    let id = connection.last_insert_rowid();

    Ok(Transaction {
        id,
        user_id: new_transaction.user_id,
        kind: new_transaction.kind,
        amount: new_transaction.amount,
        category: new_transaction.category,
        description: new_transaction.description,
        payment_method: new_transaction.payment_method,
        date: new_transaction.date,
        is_recurring: new_transaction.recurring_id.is_some(),
        recurring_id: new_transaction.recurring_id,
    })
}

/// Retrieve a transaction in the database by its `id`.
///
/// # Errors
/// This function will return a [Error::NotFound] if `id` does not refer to a
/// valid transaction, or a [Error::SqlError] if there is some other SQL error.
pub fn get_transaction(id: DatabaseID, connection: &Connection) -> Result<Transaction, Error> {
    connection
        .prepare(
            "SELECT id, user_id, kind, amount, category, description, payment_method, date,
                    is_recurring, recurring_id
             FROM \"transaction\" WHERE id = :id",
        )?
        .query_row(&[(":id", &id)], map_transaction_row)
        .map_err(|error| error.into())
}

/// Delete a transaction from the database.
///
/// # Errors
/// This function will return an error if there is an SQL error or if the
/// transaction does not exist.
pub fn delete_transaction(id: DatabaseID, connection: &Connection) -> Result<(), Error> {
    let rows_affected = connection.execute("DELETE FROM \"transaction\" WHERE id = ?1", [id])?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Count how many transactions a user recorded on `date`.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is some SQL error.
pub fn count_transactions_on(
    user_id: UserID,
    date: Date,
    connection: &Connection,
) -> Result<usize, Error> {
    connection
        .query_row(
            "SELECT COUNT(id) FROM \"transaction\" WHERE user_id = ?1 AND date = ?2",
            (user_id.as_i64(), date),
            // SQLite counts are signed 64 bit; a count is never negative.
            |row| row.get::<_, i64>(0).map(|count| count as usize),
        )
        .map_err(|error| error.into())
}

/// Get the total income and expenses for a user over `date_range` (inclusive).
///
/// # Errors
/// This function will return a [Error::SqlError] if there is some SQL error.
pub fn get_transaction_summary(
    user_id: UserID,
    date_range: RangeInclusive<Date>,
    connection: &Connection,
) -> Result<TransactionSummary, Error> {
    connection
        .query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN kind = 'income' THEN amount ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN kind = 'expense' THEN amount ELSE 0 END), 0)
             FROM \"transaction\"
             WHERE user_id = ?1 AND date BETWEEN ?2 AND ?3",
            (user_id.as_i64(), *date_range.start(), *date_range.end()),
            |row| {
                Ok(TransactionSummary {
                    income: row.get(0)?,
                    expense: row.get(1)?,
                })
            },
        )
        .map_err(|error| error.into())
}



#[cfg(test)]
mod create_transaction_tests {
    use rusqlite::Connection;
    use time::macros::date;

    use crate::{
        db::initialize,
        transaction::{get_transaction, test_support::insert_transaction},
        user::create_user,
    };

    use super::TransactionKind;

    #[test]
    fn created_transaction_round_trips() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        let user = create_user("Alice", &conn).unwrap();

        let transaction = insert_transaction(
            user.id,
            TransactionKind::Expense,
            12.50,
            date!(2025 - 01 - 20),
            &conn,
        );

        assert!(!transaction.is_recurring);
        assert_eq!(transaction, get_transaction(transaction.id, &conn).unwrap());
    }
}
