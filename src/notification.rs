//! This file defines the `Notification` type and the per-user preference flags
//! that gate which notification types may be generated.
//!
//! Notifications are write-once: the engines insert them keyed by a
//! deduplication key, and the owner may read, mark read, or delete them.

use std::{fmt::Display, str::FromStr};

use rusqlite::{
    Connection, OptionalExtension, Row, ToSql,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Type, ValueRef},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::Date;

use crate::{Error, database_id::DatabaseID, user::UserID};

/// The error returned when parsing an unrecognized notification type.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("\"{0}\" is not a recognized notification type")]
pub struct ParseNotificationTypeError(String);

/// The kind of event a notification reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// The user has not recorded any transactions today.
    DailyReminder,
    /// Month-to-date spending is well ahead of the elapsed calendar month.
    BudgetAlert,
    /// Income, expenses, and net balance over the trailing week.
    WeeklySummary,
    /// A savings objective is near, or has reached, its target.
    GoalProgress,
    /// A recurring rule materialized a transaction.
    RecurringAdded,
}

impl NotificationType {
    /// The string stored in the database for this notification type.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::DailyReminder => "daily_reminder",
            NotificationType::BudgetAlert => "budget_alert",
            NotificationType::WeeklySummary => "weekly_summary",
            NotificationType::GoalProgress => "goal_progress",
            NotificationType::RecurringAdded => "recurring_added",
        }
    }
}

impl Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = ParseNotificationTypeError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "daily_reminder" => Ok(NotificationType::DailyReminder),
            "budget_alert" => Ok(NotificationType::BudgetAlert),
            "weekly_summary" => Ok(NotificationType::WeeklySummary),
            "goal_progress" => Ok(NotificationType::GoalProgress),
            "recurring_added" => Ok(NotificationType::RecurringAdded),
            other => Err(ParseNotificationTypeError(other.to_owned())),
        }
    }
}

impl FromSql for NotificationType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error: ParseNotificationTypeError| FromSqlError::Other(Box::new(error)))
    }
}

impl ToSql for NotificationType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// A user-facing alert produced by one of the engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// The ID of the notification.
    pub id: DatabaseID,
    /// The user the notification is addressed to.
    pub user_id: UserID,
    /// The kind of event the notification reports.
    pub kind: NotificationType,
    /// A short headline.
    pub title: String,
    /// The full message text.
    pub body: String,
    /// Structured payload for the delivery transport, e.g. the percentages
    /// behind a budget alert.
    pub data: Value,
    /// Key identifying the (owner, type, natural period) this notification
    /// covers. Inserting the same key twice is a no-op.
    pub dedup_key: String,
    /// Whether the owner has seen the notification.
    pub is_read: bool,
    /// The processing date the notification was generated for.
    pub sent_at: Date,
}

/// The data needed to create a new notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    /// The user the notification is addressed to.
    pub user_id: UserID,
    /// The kind of event the notification reports.
    pub kind: NotificationType,
    /// A short headline.
    pub title: String,
    /// The full message text.
    pub body: String,
    /// Structured payload for the delivery transport.
    pub data: Value,
    /// Key identifying the (owner, type, natural period) this notification
    /// covers.
    pub dedup_key: String,
    /// The processing date the notification is generated for.
    pub sent_at: Date,
}

/// Per-user boolean gates controlling which notification types may be
/// generated for that user.
///
/// A user without a stored preference row gets the defaults: everything
/// allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    /// Whether daily reminders may be generated.
    pub daily_reminder: bool,
    /// Whether budget alerts may be generated.
    pub budget_alert: bool,
    /// Whether weekly summaries may be generated.
    pub weekly_summary: bool,
    /// Whether goal progress notifications may be generated.
    pub goal_progress: bool,
    /// Whether recurring-transaction notifications may be generated.
    pub recurring_added: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            daily_reminder: true,
            budget_alert: true,
            weekly_summary: true,
            goal_progress: true,
            recurring_added: true,
        }
    }
}

impl NotificationPreferences {
    /// Whether notifications of `kind` may be generated for this user.
    pub fn allows(&self, kind: NotificationType) -> bool {
        match kind {
            NotificationType::DailyReminder => self.daily_reminder,
            NotificationType::BudgetAlert => self.budget_alert,
            NotificationType::WeeklySummary => self.weekly_summary,
            NotificationType::GoalProgress => self.goal_progress,
            NotificationType::RecurringAdded => self.recurring_added,
        }
    }
}

/// Create the notification table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_notification_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS notification (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                data TEXT NOT NULL,
                dedup_key TEXT NOT NULL UNIQUE,
                is_read INTEGER NOT NULL DEFAULT 0,
                sent_at TEXT NOT NULL,
                FOREIGN KEY(user_id) REFERENCES user(id) ON UPDATE CASCADE ON DELETE CASCADE
                )",
        (),
    )?;

    Ok(())
}

/// Create the notification preference table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_notification_preference_table(
    connection: &Connection,
) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS notification_preference (
                user_id INTEGER PRIMARY KEY,
                daily_reminder INTEGER NOT NULL DEFAULT 1,
                budget_alert INTEGER NOT NULL DEFAULT 1,
                weekly_summary INTEGER NOT NULL DEFAULT 1,
                goal_progress INTEGER NOT NULL DEFAULT 1,
                recurring_added INTEGER NOT NULL DEFAULT 1,
                FOREIGN KEY(user_id) REFERENCES user(id) ON UPDATE CASCADE ON DELETE CASCADE
                )",
        (),
    )?;

    Ok(())
}

/// Map a database row to a [Notification].
fn map_notification_row(row: &Row) -> Result<Notification, rusqlite::Error> {
    let data_text: String = row.get(5)?;
    let data = serde_json::from_str(&data_text)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(error)))?;

    Ok(Notification {
        id: row.get(0)?,
        user_id: UserID::new(row.get(1)?),
        kind: row.get(2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        data,
        dedup_key: row.get(6)?,
        is_read: row.get(7)?,
        sent_at: row.get(8)?,
    })
}

/// Insert a notification unless one with the same deduplication key already
/// exists.
///
/// Returns the inserted notification, or `None` if the key was already taken,
/// which makes repeated engine invocations for the same period safe.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is some SQL error.
pub fn insert_notification_if_absent(
    new_notification: NewNotification,
    connection: &Connection,
) -> Result<Option<Notification>, Error> {
    connection
        .prepare(
            "INSERT INTO notification (user_id, kind, title, body, data, dedup_key, sent_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(dedup_key) DO NOTHING
             RETURNING id, user_id, kind, title, body, data, dedup_key, is_read, sent_at",
        )?
        .query_row(
            (
                new_notification.user_id.as_i64(),
                new_notification.kind,
                &new_notification.title,
                &new_notification.body,
                new_notification.data.to_string(),
                &new_notification.dedup_key,
                new_notification.sent_at,
            ),
            map_notification_row,
        )
        .optional()
        .map_err(|error| error.into())
}

/// Retrieve a user's notifications, newest first.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is some SQL error.
pub fn get_notifications(
    user_id: UserID,
    connection: &Connection,
) -> Result<Vec<Notification>, Error> {
    connection
        .prepare(
            "SELECT id, user_id, kind, title, body, data, dedup_key, is_read, sent_at
             FROM notification WHERE user_id = :user_id
             ORDER BY sent_at DESC, id DESC",
        )?
        .query_map(&[(":user_id", &user_id.as_i64())], map_notification_row)?
        .map(|maybe_notification| maybe_notification.map_err(|error| error.into()))
        .collect()
}

/// Mark a notification as read.
///
/// # Errors
/// This function will return an error if there is an SQL error or if the
/// notification does not exist.
pub fn mark_notification_read(id: DatabaseID, connection: &Connection) -> Result<(), Error> {
    let rows_affected =
        connection.execute("UPDATE notification SET is_read = 1 WHERE id = ?1", [id])?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Delete a notification.
///
/// # Errors
/// This function will return an error if there is an SQL error or if the
/// notification does not exist.
pub fn delete_notification(id: DatabaseID, connection: &Connection) -> Result<(), Error> {
    let rows_affected = connection.execute("DELETE FROM notification WHERE id = ?1", [id])?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Retrieve a user's notification preferences.
///
/// A missing preference row is not an error: the defaults (everything
/// allowed) are returned instead.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is some SQL error.
pub fn get_notification_preferences(
    user_id: UserID,
    connection: &Connection,
) -> Result<NotificationPreferences, Error> {
    let preferences = connection
        .prepare(
            "SELECT daily_reminder, budget_alert, weekly_summary, goal_progress, recurring_added
             FROM notification_preference WHERE user_id = :user_id",
        )?
        .query_row(&[(":user_id", &user_id.as_i64())], |row| {
            Ok(NotificationPreferences {
                daily_reminder: row.get(0)?,
                budget_alert: row.get(1)?,
                weekly_summary: row.get(2)?,
                goal_progress: row.get(3)?,
                recurring_added: row.get(4)?,
            })
        })
        .optional()?;

    Ok(preferences.unwrap_or_default())
}

/// Store a user's notification preferences, replacing any existing row.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is some SQL error.
pub fn set_notification_preferences(
    user_id: UserID,
    preferences: NotificationPreferences,
    connection: &Connection,
) -> Result<(), Error> {
    connection.execute(
        "INSERT INTO notification_preference
                (user_id, daily_reminder, budget_alert, weekly_summary, goal_progress, recurring_added)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(user_id) DO UPDATE SET
                daily_reminder = excluded.daily_reminder,
                budget_alert = excluded.budget_alert,
                weekly_summary = excluded.weekly_summary,
                goal_progress = excluded.goal_progress,
                recurring_added = excluded.recurring_added",
        (
            user_id.as_i64(),
            preferences.daily_reminder,
            preferences.budget_alert,
            preferences.weekly_summary,
            preferences.goal_progress,
            preferences.recurring_added,
        ),
    )?;

    Ok(())
}



#[cfg(test)]
mod notification_preferences_tests {
    use rusqlite::Connection;

    use crate::{db::initialize, user::create_user};

    use super::{
        NotificationPreferences, NotificationType, get_notification_preferences,
        set_notification_preferences,
    };

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn
    }

    #[test]
    fn missing_row_defaults_to_allow_all() {
        let conn = get_test_connection();
        let user = create_user("Alice", &conn).unwrap();

        let preferences = get_notification_preferences(user.id, &conn).unwrap();

        assert_eq!(preferences, NotificationPreferences::default());
        assert!(preferences.allows(NotificationType::BudgetAlert));
    }

    #[test]
    fn stored_preferences_round_trip() {
        let conn = get_test_connection();
        let user = create_user("Alice", &conn).unwrap();

        let preferences = NotificationPreferences {
            budget_alert: false,
            ..Default::default()
        };
        set_notification_preferences(user.id, preferences, &conn).unwrap();

        let loaded = get_notification_preferences(user.id, &conn).unwrap();
        assert!(!loaded.allows(NotificationType::BudgetAlert));
        assert!(loaded.allows(NotificationType::DailyReminder));
    }
}
