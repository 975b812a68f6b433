//! This module ties the per-module table definitions together into a single
//! schema initialization entry point.

use rusqlite::{Connection, Transaction as SqlTransaction, TransactionBehavior};

use crate::{
    loan::create_loan_table,
    notification::{create_notification_preference_table, create_notification_table},
    objective::create_objective_table,
    recurring::create_recurring_rule_table,
    transaction::create_transaction_table,
    user::create_user_table,
};

/// Create all of the application's tables if they do not exist yet.
///
/// Tables are created inside a single exclusive SQL transaction, in foreign
/// key dependency order.
///
/// # Errors
/// Returns an error if a table cannot be created or if there is an SQL error.
pub fn initialize(connection: &Connection) -> Result<(), rusqlite::Error> {
    let transaction =
        SqlTransaction::new_unchecked(connection, TransactionBehavior::Exclusive)?;

    create_user_table(&transaction)?;
    create_recurring_rule_table(&transaction)?;
    create_transaction_table(&transaction)?;
    create_objective_table(&transaction)?;
    create_loan_table(&transaction)?;
    create_notification_table(&transaction)?;
    create_notification_preference_table(&transaction)?;

    transaction.commit()?;

    Ok(())
}

#[cfg(test)]
mod initialize_tests {
    use rusqlite::Connection;

    use super::initialize;

    #[test]
    fn sql_is_valid() {
        let connection =
            Connection::open_in_memory().expect("Could not initialise in-memory SQLite database");

        assert_eq!(Ok(()), initialize(&connection));
    }

    #[test]
    fn initialize_is_idempotent() {
        let connection =
            Connection::open_in_memory().expect("Could not initialise in-memory SQLite database");

        initialize(&connection).unwrap();

        assert_eq!(Ok(()), initialize(&connection));
    }
}
