//! The notification rule engine: evaluates a user's financial state against
//! their gating preferences and emits notifications.
//!
//! Like the scheduler, the engine is a batch unit invoked with an explicit
//! processing date. Every notification is inserted through a deduplication
//! key covering its natural period, so invoking the same rule twice for the
//! same period emits nothing the second time.

use clap::ValueEnum;
use rusqlite::Connection;
use serde_json::json;
use time::{Date, Duration};

use crate::{
    Error,
    notification::{
        NewNotification, NotificationType, get_notification_preferences,
        insert_notification_if_absent,
    },
    objective::{Objective, complete_objective, get_active_objectives},
    transaction::{count_transactions_on, get_transaction_summary},
    user::{UserID, get_all_user_ids},
};

/// Objectives at or past this progress percentage get a "near goal"
/// notification.
const NEAR_GOAL_PERCENT: f64 = 80.0;

/// How many percentage points month-to-date spending must run ahead of the
/// elapsed calendar month before a budget alert fires.
const BUDGET_ALERT_MARGIN_PERCENT: f64 = 20.0;

/// The notification rule to evaluate in one engine invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RuleKind {
    /// Remind users who have not recorded any transactions today.
    DailyReminder,
    /// Alert users whose month-to-date spending is well ahead of the
    /// elapsed calendar month.
    BudgetAlert,
    /// Summarize the trailing week's income, expenses, and net balance.
    WeeklySummary,
    /// Report savings objectives that are near, or have reached, their
    /// target.
    GoalProgress,
}

impl RuleKind {
    /// The notification type emitted by this rule, which is also the
    /// preference flag that gates it.
    pub fn notification_type(&self) -> NotificationType {
        match self {
            RuleKind::DailyReminder => NotificationType::DailyReminder,
            RuleKind::BudgetAlert => NotificationType::BudgetAlert,
            RuleKind::WeeklySummary => NotificationType::WeeklySummary,
            RuleKind::GoalProgress => NotificationType::GoalProgress,
        }
    }
}

/// The counts reported by a rule engine invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NotificationOutcome {
    /// How many notifications were freshly inserted. Notifications
    /// suppressed by deduplication do not count.
    pub sent: usize,
}

/// Evaluate one notification rule for every user.
///
/// Users are processed in isolation: a failure while evaluating one user is
/// logged and skipped without blocking the rest of the batch. Users whose
/// preference flag for the rule is off are skipped entirely.
///
/// # Errors
/// This function will return an error only if the user listing itself fails,
/// e.g. the database is unreachable.
pub fn run_notification_rules(
    kind: RuleKind,
    today: Date,
    connection: &Connection,
) -> Result<NotificationOutcome, Error> {
    let user_ids = get_all_user_ids(connection)?;
    let mut outcome = NotificationOutcome::default();

    for user_id in user_ids {
        match evaluate_user(kind, user_id, today, connection) {
            Ok(sent) => outcome.sent += sent,
            Err(error) => {
                tracing::error!(
                    "evaluating {} for user {user_id} failed and was skipped: {error}",
                    kind.notification_type()
                );
            }
        }
    }

    Ok(outcome)
}

/// Evaluate one rule for one user, returning how many notifications were
/// freshly inserted.
fn evaluate_user(
    kind: RuleKind,
    user_id: UserID,
    today: Date,
    connection: &Connection,
) -> Result<usize, Error> {
    let preferences = get_notification_preferences(user_id, connection)?;
    if !preferences.allows(kind.notification_type()) {
        return Ok(0);
    }

    match kind {
        RuleKind::DailyReminder => evaluate_daily_reminder(user_id, today, connection),
        RuleKind::BudgetAlert => evaluate_budget_alert(user_id, today, connection),
        RuleKind::WeeklySummary => evaluate_weekly_summary(user_id, today, connection),
        RuleKind::GoalProgress => evaluate_goal_progress(user_id, today, connection),
    }
}

/// Remind the user if they have recorded no transactions dated `today`.
fn evaluate_daily_reminder(
    user_id: UserID,
    today: Date,
    connection: &Connection,
) -> Result<usize, Error> {
    if count_transactions_on(user_id, today, connection)? > 0 {
        return Ok(0);
    }

    let inserted = insert_notification_if_absent(
        NewNotification {
            user_id,
            kind: NotificationType::DailyReminder,
            title: "Don't forget to log today's transactions".to_owned(),
            body: "You haven't recorded any transactions today.".to_owned(),
            data: json!({ "date": today.to_string() }),
            dedup_key: format!("{user_id}:daily_reminder:{today}"),
            sent_at: today,
        },
        connection,
    )?;

    Ok(inserted.is_some() as usize)
}

/// Alert the user when month-to-date spending runs more than
/// [BUDGET_ALERT_MARGIN_PERCENT] percentage points ahead of the elapsed
/// calendar month, measured against the previous month's total spending.
fn evaluate_budget_alert(
    user_id: UserID,
    today: Date,
    connection: &Connection,
) -> Result<usize, Error> {
    let month_start = today
        .replace_day(1)
        .expect("the first of the month is always a valid date");
    let month_to_date = get_transaction_summary(user_id, month_start..=today, connection)?.expense;

    let previous_month_end = month_start
        .previous_day()
        .expect("the first of the month always has a previous day");
    let previous_month_start = previous_month_end
        .replace_day(1)
        .expect("the first of the month is always a valid date");
    let last_month_total =
        get_transaction_summary(user_id, previous_month_start..=previous_month_end, connection)?
            .expense;

    // With no spending last month the ratio is undefined, so there is
    // nothing meaningful to compare against.
    if last_month_total == 0.0 {
        return Ok(0);
    }

    let calendar_percent =
        f64::from(today.day()) / f64::from(today.month().length(today.year())) * 100.0;
    let spend_percent = month_to_date / last_month_total * 100.0;

    if spend_percent - calendar_percent <= BUDGET_ALERT_MARGIN_PERCENT {
        return Ok(0);
    }

    let inserted = insert_notification_if_absent(
        NewNotification {
            user_id,
            kind: NotificationType::BudgetAlert,
            title: "Spending is ahead of schedule".to_owned(),
            body: format!(
                "You have spent {spend_percent:.0}% of last month's total, but only \
                 {calendar_percent:.0}% of the month has elapsed."
            ),
            data: json!({
                "spend_percent": spend_percent,
                "calendar_percent": calendar_percent,
                "month_to_date": month_to_date,
                "last_month_total": last_month_total,
            }),
            dedup_key: format!(
                "{user_id}:budget_alert:{}-{:02}",
                today.year(),
                today.month() as u8
            ),
            sent_at: today,
        },
        connection,
    )?;

    Ok(inserted.is_some() as usize)
}

/// Summarize income, expenses, and net balance over the trailing 7 days.
///
/// Always emits (once per ISO week, via the deduplication key); there is no
/// threshold gating beyond the preference flag.
fn evaluate_weekly_summary(
    user_id: UserID,
    today: Date,
    connection: &Connection,
) -> Result<usize, Error> {
    let week_start = today - Duration::days(6);
    let summary = get_transaction_summary(user_id, week_start..=today, connection)?;

    let (iso_year, iso_week, _) = today.to_iso_week_date();

    let inserted = insert_notification_if_absent(
        NewNotification {
            user_id,
            kind: NotificationType::WeeklySummary,
            title: "Your weekly summary".to_owned(),
            body: format!(
                "Income {:.2}, expenses {:.2}, net {:.2}.",
                summary.income,
                summary.expense,
                summary.net()
            ),
            data: json!({
                "income": summary.income,
                "expense": summary.expense,
                "net": summary.net(),
            }),
            dedup_key: format!("{user_id}:weekly_summary:{iso_year}-W{iso_week:02}"),
            sent_at: today,
        },
        connection,
    )?;

    Ok(inserted.is_some() as usize)
}

/// Report each active objective that is near, or has reached, its target.
///
/// Objectives that reach their target are marked completed so they drop out
/// of future evaluations. The status update and the "goal reached"
/// notification happen inside one SQL transaction: if the insert fails, the
/// completion rolls back with it and the objective stays active, so the
/// notification is retried on the next invocation instead of being lost.
/// A user may receive zero, one, or several notifications per invocation,
/// one per qualifying objective.
fn evaluate_goal_progress(
    user_id: UserID,
    today: Date,
    connection: &Connection,
) -> Result<usize, Error> {
    let mut sent = 0;

    for objective in get_active_objectives(user_id, connection)? {
        let progress = objective.progress_percent();

        if progress >= 100.0 {
            let sql_transaction = connection.unchecked_transaction()?;
            complete_objective(objective.id, &sql_transaction)?;
            sent +=
                emit_goal_notification(&objective, progress, "reached", today, &sql_transaction)?;
            sql_transaction.commit()?;
        } else if progress >= NEAR_GOAL_PERCENT {
            sent += emit_goal_notification(&objective, progress, "near", today, connection)?;
        }
    }

    Ok(sent)
}

fn emit_goal_notification(
    objective: &Objective,
    progress: f64,
    milestone: &str,
    today: Date,
    connection: &Connection,
) -> Result<usize, Error> {
    let (title, body) = if milestone == "reached" {
        (
            format!("Goal reached: {}", objective.name),
            format!(
                "You saved {:.2} and hit your target of {:.2}. Congratulations!",
                objective.current_amount, objective.target_amount
            ),
        )
    } else {
        (
            format!("Almost there: {}", objective.name),
            format!(
                "You are {progress:.0}% of the way to \"{}\".",
                objective.name
            ),
        )
    };

    let inserted = insert_notification_if_absent(
        NewNotification {
            user_id: objective.user_id,
            kind: NotificationType::GoalProgress,
            title,
            body,
            data: json!({
                "objective_id": objective.id,
                "progress_percent": progress,
            }),
            dedup_key: format!(
                "{}:goal_progress:{}:{milestone}",
                objective.user_id, objective.id
            ),
            sent_at: today,
        },
        connection,
    )?;

    Ok(inserted.is_some() as usize)
}




#[cfg(test)]
mod goal_progress_tests {
    use rusqlite::Connection;
    use time::macros::date;

    use crate::{
        db::initialize,
        notification::get_notifications,
        objective::{ObjectiveStatus, create_objective, get_objective, record_deposit},
        user::create_user,
    };

    use super::{RuleKind, run_notification_rules};

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn
    }

    #[test]
    fn objective_at_82_percent_gets_a_near_goal_notification() {
        let conn = get_test_connection();
        let user = create_user("Alice", &conn).unwrap();
        let objective = create_objective(user.id, "Holiday", 100.0, &conn).unwrap();
        record_deposit(objective.id, 82.0, &conn).unwrap();

        let outcome =
            run_notification_rules(RuleKind::GoalProgress, date!(2025 - 06 - 10), &conn).unwrap();

        assert_eq!(outcome.sent, 1);
        let notifications = get_notifications(user.id, &conn).unwrap();
        assert_eq!(notifications[0].title, "Almost there: Holiday");
        // Still active: only reaching the target completes an objective.
        assert_eq!(
            get_objective(objective.id, &conn).unwrap().status,
            ObjectiveStatus::Active
        );
    }

    #[test]
    fn objective_at_target_is_completed_and_notified() {
        let conn = get_test_connection();
        let user = create_user("Alice", &conn).unwrap();
        let objective = create_objective(user.id, "Holiday", 100.0, &conn).unwrap();
        // Seed the saved amount directly so record_deposit's own completion
        // logic stays out of the picture.
        conn.execute(
            "UPDATE objective SET current_amount = 100.0 WHERE id = ?1",
            [objective.id],
        )
        .unwrap();

        let outcome =
            run_notification_rules(RuleKind::GoalProgress, date!(2025 - 06 - 10), &conn).unwrap();

        assert_eq!(outcome.sent, 1);
        let notifications = get_notifications(user.id, &conn).unwrap();
        assert_eq!(notifications[0].title, "Goal reached: Holiday");
        assert_eq!(
            get_objective(objective.id, &conn).unwrap().status,
            ObjectiveStatus::Completed
        );

        // The completed objective drops out of the next evaluation.
        let rerun =
            run_notification_rules(RuleKind::GoalProgress, date!(2025 - 06 - 11), &conn).unwrap();
        assert_eq!(rerun.sent, 0);
    }

    #[test]
    fn failed_notification_insert_leaves_the_objective_active_for_retry() {
        let conn = get_test_connection();
        let user = create_user("Alice", &conn).unwrap();
        let objective = create_objective(user.id, "Holiday", 100.0, &conn).unwrap();
        conn.execute(
            "UPDATE objective SET current_amount = 100.0 WHERE id = ?1",
            [objective.id],
        )
        .unwrap();

        // Make the notification insert fail so the completion must roll back
        // with it.
        conn.execute(
            "ALTER TABLE notification RENAME TO notification_unavailable",
            [],
        )
        .unwrap();

        let result = run_notification_rules(RuleKind::GoalProgress, date!(2025 - 06 - 10), &conn);

        assert_eq!(result.unwrap().sent, 0);
        assert_eq!(
            get_objective(objective.id, &conn).unwrap().status,
            ObjectiveStatus::Active
        );

        // Once the store is back, the next run completes the objective and
        // sends the notification it could not send before.
        conn.execute(
            "ALTER TABLE notification_unavailable RENAME TO notification",
            [],
        )
        .unwrap();

        let rerun =
            run_notification_rules(RuleKind::GoalProgress, date!(2025 - 06 - 11), &conn).unwrap();

        assert_eq!(rerun.sent, 1);
        let notifications = get_notifications(user.id, &conn).unwrap();
        assert_eq!(notifications[0].title, "Goal reached: Holiday");
        assert_eq!(
            get_objective(objective.id, &conn).unwrap().status,
            ObjectiveStatus::Completed
        );
    }

    #[test]
    fn objective_at_50_percent_emits_nothing() {
        let conn = get_test_connection();
        let user = create_user("Alice", &conn).unwrap();
        let objective = create_objective(user.id, "Holiday", 100.0, &conn).unwrap();
        record_deposit(objective.id, 50.0, &conn).unwrap();

        let outcome =
            run_notification_rules(RuleKind::GoalProgress, date!(2025 - 06 - 10), &conn).unwrap();

        assert_eq!(outcome.sent, 0);
        assert_eq!(get_notifications(user.id, &conn).unwrap(), vec![]);
    }

    #[test]
    fn each_qualifying_objective_gets_its_own_notification() {
        let conn = get_test_connection();
        let user = create_user("Alice", &conn).unwrap();
        let near = create_objective(user.id, "Holiday", 100.0, &conn).unwrap();
        record_deposit(near.id, 85.0, &conn).unwrap();
        let far = create_objective(user.id, "New laptop", 2000.0, &conn).unwrap();
        record_deposit(far.id, 100.0, &conn).unwrap();
        let also_near = create_objective(user.id, "Emergency fund", 500.0, &conn).unwrap();
        record_deposit(also_near.id, 450.0, &conn).unwrap();

        let outcome =
            run_notification_rules(RuleKind::GoalProgress, date!(2025 - 06 - 10), &conn).unwrap();

        assert_eq!(outcome.sent, 2);
    }
}
