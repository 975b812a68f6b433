//! The recurrence scheduler: scans due recurring rules, materializes a
//! transaction for each, advances the schedule by one period, and emits a
//! notification.
//!
//! The scheduler is a batch, run-to-completion unit. It is handed an explicit
//! processing date by its caller (a cron trigger in production, a fixed date
//! in tests) and never reads a wall clock itself.

use rusqlite::Connection;
use serde_json::json;
use time::Date;

use crate::{
    Error,
    database_id::DatabaseID,
    notification::{NewNotification, NotificationType, insert_notification_if_absent},
    recurring::{RecurringRule, claim_and_advance, get_due_rule_ids, get_recurring_rule},
    transaction::{NewTransaction, create_transaction},
};

/// The counts reported by a scheduler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerOutcome {
    /// How many due rules the invocation looked at, including malformed rules
    /// and rules another invocation claimed first.
    pub considered: usize,
    /// How many transactions were materialized.
    pub created: usize,
}

/// Execute every active recurring rule that is due on or before `today`.
///
/// Each rule is processed in isolation: one rule failing to load or execute
/// is logged and skipped without blocking the rest of the batch, and because
/// its schedule is left untouched it is naturally retried on the next
/// invocation. Each invocation advances a rule by exactly one period, so a
/// rule that has fallen several periods behind catches up across repeated
/// invocations rather than in a single pass.
///
/// # Errors
/// This function will return an error only if the due-rule scan itself fails,
/// e.g. the database is unreachable.
pub fn run_recurring_scheduler(
    today: Date,
    connection: &Connection,
) -> Result<SchedulerOutcome, Error> {
    let due_ids = get_due_rule_ids(today, connection)?;
    let mut outcome = SchedulerOutcome::default();

    for id in due_ids {
        outcome.considered += 1;

        let rule = match get_recurring_rule(id, connection) {
            Ok(rule) => rule,
            Err(error) if error.is_validation_error() => {
                tracing::warn!(
                    "recurring rule {id} failed validation and was skipped without advancing \
                     its schedule, flag for manual review: {error}"
                );
                continue;
            }
            Err(error) => {
                tracing::error!(
                    "could not load recurring rule {id}, it stays due and will be retried \
                     on the next invocation: {error}"
                );
                continue;
            }
        };

        match execute_rule(&rule, today, connection) {
            Ok(Some(transaction_id)) => {
                tracing::debug!(
                    "recurring rule {} materialized transaction {transaction_id}",
                    rule.id
                );
                outcome.created += 1;
            }
            Ok(None) => {
                tracing::debug!(
                    "recurring rule {} was already claimed by a concurrent invocation",
                    rule.id
                );
            }
            Err(error) => {
                tracing::error!(
                    "executing recurring rule {} failed and was rolled back, it stays due \
                     and will be retried on the next invocation: {error}",
                    rule.id
                );
            }
        }
    }

    Ok(outcome)
}

/// Execute a single due rule: claim it, materialize the transaction, and emit
/// the notification, all inside one SQL transaction.
///
/// Returns the ID of the materialized transaction, or `None` if the claim was
/// lost because another invocation already advanced the rule. Any failure
/// after the claim rolls the whole unit back, so the rule stays due.
fn execute_rule(
    rule: &RecurringRule,
    today: Date,
    connection: &Connection,
) -> Result<Option<DatabaseID>, Error> {
    let sql_transaction = connection.unchecked_transaction()?;

    if !claim_and_advance(rule, today, &sql_transaction)? {
        return Ok(None);
    }

    let transaction = create_transaction(
        NewTransaction {
            user_id: rule.user_id,
            kind: rule.kind,
            amount: rule.amount,
            category: rule.category.clone(),
            description: rule.description.clone(),
            payment_method: rule.payment_method.clone(),
            date: today,
            recurring_id: Some(rule.id),
        },
        &sql_transaction,
    )?;

    insert_notification_if_absent(
        NewNotification {
            user_id: rule.user_id,
            kind: NotificationType::RecurringAdded,
            title: "Recurring transaction added".to_owned(),
            body: format!(
                "{} ({}): {:.2}",
                rule.description, rule.category, rule.amount
            ),
            data: json!({
                "transaction_id": transaction.id,
                "recurring_id": rule.id,
                "amount": rule.amount,
                "category": rule.category,
            }),
            dedup_key: format!("{}:recurring_added:{}:{today}", rule.user_id, rule.id),
            sent_at: today,
        },
        &sql_transaction,
    )?;

    sql_transaction.commit()?;

    Ok(Some(transaction.id))
}

#[cfg(test)]
mod run_recurring_scheduler_tests {
    use rusqlite::Connection;
    use time::macros::date;

    use crate::{
        db::initialize,
        notification::{NotificationType, get_notifications},
        recurring::{Frequency, NewRecurringRule, create_recurring_rule, get_recurring_rule},
        transaction::{TransactionKind, get_transaction_summary},
        user::{UserID, create_user},
    };

    use super::{SchedulerOutcome, run_recurring_scheduler};

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn
    }

    fn monthly_rent_rule(user_id: UserID) -> NewRecurringRule {
        NewRecurringRule {
            user_id,
            kind: TransactionKind::Expense,
            amount: 1200.0,
            category: "Housing".to_owned(),
            description: "Rent".to_owned(),
            payment_method: Some("bank transfer".to_owned()),
            frequency: Frequency::Monthly,
            next_date: date!(2025 - 01 - 15),
        }
    }

    #[test]
    fn due_rule_materializes_one_transaction_and_advances_one_period() {
        let conn = get_test_connection();
        let user = create_user("Alice", &conn).unwrap();
        let rule = create_recurring_rule(monthly_rent_rule(user.id), &conn).unwrap();
        let today = date!(2025 - 01 - 20);

        let outcome = run_recurring_scheduler(today, &conn).unwrap();

        assert_eq!(
            outcome,
            SchedulerOutcome {
                considered: 1,
                created: 1
            }
        );

        let updated = get_recurring_rule(rule.id, &conn).unwrap();
        assert_eq!(updated.next_date, date!(2025 - 02 - 15));
        assert_eq!(updated.last_executed, Some(today));

        // The materialized transaction is dated today, not the rule's due date.
        let summary = get_transaction_summary(user.id, today..=today, &conn).unwrap();
        assert_eq!(summary.expense, 1200.0);

        let notifications = get_notifications(user.id, &conn).unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationType::RecurringAdded);
        assert_eq!(notifications[0].body, "Rent (Housing): 1200.00");
    }

    #[test]
    fn rule_that_is_not_due_is_never_executed() {
        let conn = get_test_connection();
        let user = create_user("Alice", &conn).unwrap();
        create_recurring_rule(monthly_rent_rule(user.id), &conn).unwrap();
        let today = date!(2025 - 01 - 10);

        // Invoking twice with the same date creates zero transactions both
        // times.
        for _ in 0..2 {
            let outcome = run_recurring_scheduler(today, &conn).unwrap();
            assert_eq!(outcome, SchedulerOutcome::default());
        }
    }

    #[test]
    fn rerunning_after_execution_is_a_no_op_until_the_next_period() {
        let conn = get_test_connection();
        let user = create_user("Alice", &conn).unwrap();
        create_recurring_rule(monthly_rent_rule(user.id), &conn).unwrap();
        let today = date!(2025 - 01 - 20);

        assert_eq!(run_recurring_scheduler(today, &conn).unwrap().created, 1);

        let rerun = run_recurring_scheduler(today, &conn).unwrap();
        assert_eq!(rerun, SchedulerOutcome::default());
    }

    #[test]
    fn stale_rule_catches_up_one_period_per_invocation() {
        let conn = get_test_connection();
        let user = create_user("Alice", &conn).unwrap();
        let rule = create_recurring_rule(monthly_rent_rule(user.id), &conn).unwrap();
        // Several periods behind.
        let today = date!(2025 - 04 - 01);

        assert_eq!(run_recurring_scheduler(today, &conn).unwrap().created, 1);
        assert_eq!(
            get_recurring_rule(rule.id, &conn).unwrap().next_date,
            date!(2025 - 02 - 15)
        );

        assert_eq!(run_recurring_scheduler(today, &conn).unwrap().created, 1);
        assert_eq!(
            get_recurring_rule(rule.id, &conn).unwrap().next_date,
            date!(2025 - 03 - 15)
        );
    }

    #[test]
    fn malformed_rule_is_skipped_without_blocking_the_batch() {
        let conn = get_test_connection();
        let user = create_user("Alice", &conn).unwrap();

        conn.execute(
            "INSERT INTO recurring_rule
                    (user_id, kind, amount, category, description, frequency, next_date)
             VALUES (?1, 'expense', 1.0, 'Misc', 'bad rule', 'fortnightly', ?2)",
            (user.id.as_i64(), date!(2025 - 01 - 01)),
        )
        .unwrap();
        let bad_rule_id = conn.last_insert_rowid();
        create_recurring_rule(monthly_rent_rule(user.id), &conn).unwrap();

        let outcome = run_recurring_scheduler(date!(2025 - 01 - 20), &conn).unwrap();

        assert_eq!(
            outcome,
            SchedulerOutcome {
                considered: 2,
                created: 1
            }
        );

        // The malformed rule's schedule is deliberately untouched.
        let stored_next_date: String = conn
            .query_row(
                "SELECT next_date FROM recurring_rule WHERE id = ?1",
                [bad_rule_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stored_next_date, "2025-01-01");
    }

    #[test]
    fn weekly_rule_advances_by_seven_days() {
        let conn = get_test_connection();
        let user = create_user("Alice", &conn).unwrap();
        let rule = create_recurring_rule(
            NewRecurringRule {
                frequency: Frequency::Weekly,
                next_date: date!(2025 - 06 - 02),
                ..monthly_rent_rule(user.id)
            },
            &conn,
        )
        .unwrap();

        run_recurring_scheduler(date!(2025 - 06 - 02), &conn).unwrap();

        assert_eq!(
            get_recurring_rule(rule.id, &conn).unwrap().next_date,
            date!(2025 - 06 - 09)
        );
    }
}
