//! This file defines the `RecurringRule` type, a template describing a
//! transaction to be materialized automatically on a schedule, and the
//! schedule arithmetic that advances a rule by one period.

use std::{fmt::Display, str::FromStr};

use rusqlite::{
    Connection, Row, ToSql,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};
use time::{Date, Duration, Month};

use crate::{
    Error,
    database_id::DatabaseID,
    transaction::TransactionKind,
    user::UserID,
};

/// The error returned when parsing an unrecognized frequency.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("\"{0}\" is not a recognized frequency")]
pub struct ParseFrequencyError(String);

/// How often a recurring rule materializes a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Every 7 days.
    Weekly,
    /// A calendar month of variable length.
    Monthly,
    /// A calendar year.
    Yearly,
}

impl Frequency {
    /// The string stored in the database for this frequency.
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Yearly => "yearly",
        }
    }
}

impl Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = ParseFrequencyError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "yearly" => Ok(Frequency::Yearly),
            other => Err(ParseFrequencyError(other.to_owned())),
        }
    }
}

impl FromSql for Frequency {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error: ParseFrequencyError| FromSqlError::Other(Box::new(error)))
    }
}

impl ToSql for Frequency {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// The date a rule is next due after being executed on its current `date`.
///
/// Weekly rules advance by exactly 7 days. Monthly and yearly rules advance by
/// one calendar month or year, preserving the day-of-month. When the target
/// month is shorter than the current day-of-month, the date is clamped to the
/// last day of the target month (Jan 31 advances to Feb 28, or Feb 29 in a
/// leap year), and the clamped date becomes the new anchor for subsequent
/// advancements.
pub fn next_occurrence(date: Date, frequency: Frequency) -> Date {
    match frequency {
        Frequency::Weekly => date + Duration::days(7),
        Frequency::Monthly => add_calendar_months(date, 1),
        Frequency::Yearly => add_calendar_months(date, 12),
    }
}

/// Add `months` calendar months to `date`, clamping the day-of-month to the
/// length of the target month.
fn add_calendar_months(date: Date, months: i32) -> Date {
    let month_index = date.month() as i32 - 1 + months;
    let year = date.year() + month_index.div_euclid(12);
    let month = Month::try_from((month_index.rem_euclid(12) + 1) as u8)
        .expect("month index is always in 1..=12 after euclidean remainder");
    let day = date.day().min(month.length(year));

    Date::from_calendar_date(year, month, day)
        .expect("clamped day is always valid for the target month")
}

/// A template describing a transaction to be created automatically on a
/// schedule, e.g. wages or a phone bill.
///
/// `next_date` is non-decreasing: every execution advances it by exactly one
/// period. Inactive rules are never executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringRule {
    /// The ID of the rule.
    pub id: DatabaseID,
    /// The user that owns the rule.
    pub user_id: UserID,
    /// Whether the materialized transactions are income or expenses.
    pub kind: TransactionKind,
    /// The amount of each materialized transaction.
    pub amount: f64,
    /// The category copied onto each materialized transaction.
    pub category: String,
    /// The description copied onto each materialized transaction.
    pub description: String,
    /// The payment method copied onto each materialized transaction.
    pub payment_method: Option<String>,
    /// How often the rule materializes a transaction.
    pub frequency: Frequency,
    /// When the rule is next due.
    pub next_date: Date,
    /// When the rule last materialized a transaction, if it ever has.
    pub last_executed: Option<Date>,
    /// Whether the scheduler should consider this rule at all.
    pub is_active: bool,
}

/// The data needed to create a new recurring rule.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecurringRule {
    /// The user that will own the rule.
    pub user_id: UserID,
    /// Whether the materialized transactions are income or expenses.
    pub kind: TransactionKind,
    /// The amount of each materialized transaction.
    pub amount: f64,
    /// The category copied onto each materialized transaction.
    pub category: String,
    /// The description copied onto each materialized transaction.
    pub description: String,
    /// The payment method copied onto each materialized transaction.
    pub payment_method: Option<String>,
    /// How often the rule materializes a transaction.
    pub frequency: Frequency,
    /// When the rule is first due.
    pub next_date: Date,
}

/// Create the recurring rule table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_recurring_rule_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS recurring_rule (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                amount REAL NOT NULL,
                category TEXT NOT NULL,
                description TEXT NOT NULL,
                payment_method TEXT,
                frequency TEXT NOT NULL,
                next_date TEXT NOT NULL,
                last_executed TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                FOREIGN KEY(user_id) REFERENCES user(id) ON UPDATE CASCADE ON DELETE CASCADE
                )",
        (),
    )?;

    Ok(())
}

/// Map a database row to a [RecurringRule].
///
/// Fails with a conversion error if the stored kind or frequency is not
/// recognized; callers surface this as [Error::MalformedRecord].
fn map_rule_row(row: &Row) -> Result<RecurringRule, rusqlite::Error> {
    Ok(RecurringRule {
        id: row.get(0)?,
        user_id: UserID::new(row.get(1)?),
        kind: row.get(2)?,
        amount: row.get(3)?,
        category: row.get(4)?,
        description: row.get(5)?,
        payment_method: row.get(6)?,
        frequency: row.get(7)?,
        next_date: row.get(8)?,
        last_executed: row.get(9)?,
        is_active: row.get(10)?,
    })
}

/// Create a recurring rule in the database.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn create_recurring_rule(
    new_rule: NewRecurringRule,
    connection: &Connection,
) -> Result<RecurringRule, Error> {
    connection.execute(
        "INSERT INTO recurring_rule
                (user_id, kind, amount, category, description, payment_method, frequency, next_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        (
            new_rule.user_id.as_i64(),
            new_rule.kind,
            new_rule.amount,
            &new_rule.category,
            &new_rule.description,
            &new_rule.payment_method,
            new_rule.frequency,
            new_rule.next_date,
        ),
    )?;

    let id = connection.last_insert_rowid();

    Ok(RecurringRule {
        id,
        user_id: new_rule.user_id,
        kind: new_rule.kind,
        amount: new_rule.amount,
        category: new_rule.category,
        description: new_rule.description,
        payment_method: new_rule.payment_method,
        frequency: new_rule.frequency,
        next_date: new_rule.next_date,
        last_executed: None,
        is_active: true,
    })
}

/// Retrieve a recurring rule in the database by `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to a valid rule,
/// - [Error::MalformedRecord] if the stored row fails validation,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_recurring_rule(id: DatabaseID, connection: &Connection) -> Result<RecurringRule, Error> {
    connection
        .prepare(
            "SELECT id, user_id, kind, amount, category, description, payment_method, frequency,
                    next_date, last_executed, is_active
             FROM recurring_rule WHERE id = :id",
        )?
        .query_row(&[(":id", &id)], map_rule_row)
        .map_err(|error| error.into())
}

/// Activate or deactivate a recurring rule.
///
/// Deactivated rules are ignored by the scheduler until reactivated; their
/// `next_date` is left untouched.
///
/// # Errors
/// This function will return an error if there is an SQL error or if the rule
/// does not exist.
pub fn set_recurring_rule_active(
    id: DatabaseID,
    is_active: bool,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE recurring_rule SET is_active = ?1 WHERE id = ?2",
        (is_active, id),
    )?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// The IDs of all active rules that are due on or before `today`.
///
/// IDs only: each rule is then loaded and validated individually, so that one
/// malformed row cannot poison the whole batch.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is some SQL error.
pub fn get_due_rule_ids(today: Date, connection: &Connection) -> Result<Vec<DatabaseID>, Error> {
    connection
        .prepare(
            "SELECT id FROM recurring_rule
             WHERE is_active = 1 AND next_date <= :today
             ORDER BY next_date, id",
        )?
        .query_map(&[(":today", &today)], |row| row.get(0))?
        .map(|maybe_id| maybe_id.map_err(|error| error.into()))
        .collect()
}

/// Atomically claim a due rule and advance its schedule by one period.
///
/// The update is conditioned on the rule still having the `next_date` the
/// caller observed, so a concurrent invocation that already advanced the rule
/// loses nothing and the loser simply skips the rule. Returns whether the
/// claim succeeded.
///
/// The caller is expected to run this inside a SQL transaction together with
/// the materialized transaction insert, so that a failed insert rolls the
/// claim back and the rule stays due.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is some SQL error.
pub fn claim_and_advance(
    rule: &RecurringRule,
    today: Date,
    connection: &Connection,
) -> Result<bool, Error> {
    let advanced = next_occurrence(rule.next_date, rule.frequency);

    let rows_affected = connection.execute(
        "UPDATE recurring_rule SET next_date = ?1, last_executed = ?2
         WHERE id = ?3 AND next_date = ?4 AND is_active = 1",
        (advanced, today, rule.id, rule.next_date),
    )?;

    Ok(rows_affected == 1)
}

#[cfg(test)]
mod frequency_tests {
    use super::Frequency;

    #[test]
    fn parses_known_frequencies() {
        assert_eq!("weekly".parse(), Ok(Frequency::Weekly));
        assert_eq!("monthly".parse(), Ok(Frequency::Monthly));
        assert_eq!("yearly".parse(), Ok(Frequency::Yearly));
    }

    #[test]
    fn rejects_unknown_frequency() {
        assert!("fortnightly".parse::<Frequency>().is_err());
    }
}


#[cfg(test)]
mod claim_and_advance_tests {
    use rusqlite::Connection;
    use time::macros::date;

    use crate::{
        db::initialize,
        transaction::TransactionKind,
        user::create_user,
    };

    use super::{
        Frequency, NewRecurringRule, claim_and_advance, create_recurring_rule, get_due_rule_ids,
        get_recurring_rule,
    };

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn
    }

    fn new_rule(user_id: crate::user::UserID) -> NewRecurringRule {
        NewRecurringRule {
            user_id,
            kind: TransactionKind::Expense,
            amount: 9.99,
            category: "Subscriptions".to_owned(),
            description: "Streaming service".to_owned(),
            payment_method: Some("card".to_owned()),
            frequency: Frequency::Monthly,
            next_date: date!(2025 - 01 - 15),
        }
    }

    #[test]
    fn claim_advances_schedule_once() {
        let conn = get_test_connection();
        let user = create_user("Alice", &conn).unwrap();
        let rule = create_recurring_rule(new_rule(user.id), &conn).unwrap();
        let today = date!(2025 - 01 - 20);

        assert!(claim_and_advance(&rule, today, &conn).unwrap());

        let updated = get_recurring_rule(rule.id, &conn).unwrap();
        assert_eq!(updated.next_date, date!(2025 - 02 - 15));
        assert_eq!(updated.last_executed, Some(today));
    }

    #[test]
    fn stale_claim_is_rejected() {
        let conn = get_test_connection();
        let user = create_user("Alice", &conn).unwrap();
        let rule = create_recurring_rule(new_rule(user.id), &conn).unwrap();
        let today = date!(2025 - 01 - 20);

        assert!(claim_and_advance(&rule, today, &conn).unwrap());
        // The in-memory copy still holds the old next_date, so a second claim
        // against it must lose.
        assert!(!claim_and_advance(&rule, today, &conn).unwrap());

        let updated = get_recurring_rule(rule.id, &conn).unwrap();
        assert_eq!(updated.next_date, date!(2025 - 02 - 15));
    }

    #[test]
    fn due_rule_ids_exclude_inactive_and_future_rules() {
        let conn = get_test_connection();
        let user = create_user("Alice", &conn).unwrap();

        let due = create_recurring_rule(new_rule(user.id), &conn).unwrap();

        let mut future = new_rule(user.id);
        future.next_date = date!(2025 - 03 - 01);
        create_recurring_rule(future, &conn).unwrap();

        let inactive = create_recurring_rule(new_rule(user.id), &conn).unwrap();
        super::set_recurring_rule_active(inactive.id, false, &conn).unwrap();

        let ids = get_due_rule_ids(date!(2025 - 01 - 20), &conn).unwrap();

        assert_eq!(ids, vec![due.id]);
    }

    #[test]
    fn malformed_frequency_is_a_typed_error() {
        let conn = get_test_connection();
        let user = create_user("Alice", &conn).unwrap();

        conn.execute(
            "INSERT INTO recurring_rule
                    (user_id, kind, amount, category, description, frequency, next_date)
             VALUES (?1, 'expense', 1.0, 'Misc', 'bad rule', 'fortnightly', ?2)",
            (user.id.as_i64(), date!(2025 - 01 - 01)),
        )
        .unwrap();
        let id = conn.last_insert_rowid();

        let error = get_recurring_rule(id, &conn).unwrap_err();

        assert!(error.is_validation_error(), "got {error:?}");
    }
}
