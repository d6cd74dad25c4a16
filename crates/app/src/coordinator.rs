use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::info;

use staffbook_core::{plan_transfer, DepartmentTransfer, EmployeeFields};
use staffbook_storage::{Database, NewDepartmentHistory};

use crate::records::{RecordError, StoreFailure};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Applies employee updates while keeping the department history in step.
///
/// A history row is written exactly when the stored department differs from the
/// requested one, inside the same transaction as the employee update.
#[derive(Clone)]
pub struct DepartmentHistoryCoordinator {
    database: Database,
    clock: Clock,
}

/// Outcome of a committed update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedUpdate {
    pub employee_id: i64,
    pub transfer: Option<RecordedTransfer>,
}

/// Department history row written by an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTransfer {
    pub history_id: i64,
    pub transfer: DepartmentTransfer,
    pub change_date: DateTime<Utc>,
}

impl DepartmentHistoryCoordinator {
    pub fn new(database: Database, clock: Clock) -> Self {
        Self { database, clock }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Overwrites the employee with `fields`, recording a transfer when the
    /// department changes.
    pub async fn apply_update(
        &self,
        employee_id: i64,
        fields: &EmployeeFields,
    ) -> Result<AppliedUpdate, RecordError> {
        let employees = self.database.employees();
        let mut tx = self.database.begin_write().await?;

        let current_department_id = employees
            .current_department_id(&mut tx, employee_id)
            .await?
            .ok_or(RecordError::employee_not_found(employee_id))?;

        if !self
            .database
            .departments()
            .exists(&mut tx, fields.department_id)
            .await?
        {
            return Err(RecordError::department_not_found(fields.department_id));
        }

        let transfer = match plan_transfer(employee_id, current_department_id, fields.department_id)
        {
            Some(transfer) => {
                let change_date = self.now();
                let history_id = self
                    .database
                    .department_histories()
                    .insert(
                        &mut tx,
                        &NewDepartmentHistory {
                            employee_id,
                            old_department_id: transfer.old_department_id,
                            new_department_id: transfer.new_department_id,
                            change_date,
                        },
                    )
                    .await?;
                Some(RecordedTransfer {
                    history_id,
                    transfer,
                    change_date,
                })
            }
            None => None,
        };

        let affected = employees.update(&mut tx, employee_id, fields).await?;
        if affected != 1 {
            return Err(StoreFailure::UnexpectedRowCount {
                employee_id,
                affected,
            }
            .into());
        }

        tx.commit().await?;

        if let Some(recorded) = &transfer {
            counter!("department_transfers_total").increment(1);
            info!(
                stage = "coordinator",
                employee_id,
                history_id = recorded.history_id,
                old_department_id = recorded.transfer.old_department_id,
                new_department_id = recorded.transfer.new_department_id,
                "department transfer recorded"
            );
        }

        Ok(AppliedUpdate {
            employee_id,
            transfer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use staffbook_storage::EmployeeError;
    use tempfile::TempDir;

    async fn setup() -> (DepartmentHistoryCoordinator, Database, TempDir, DateTime<Utc>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("coordinator.db").display());
        let database = Database::connect(&url).await.expect("connect");
        database.run_migrations().await.expect("migrations");
        let fixed = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let coordinator = DepartmentHistoryCoordinator::new(database.clone(), Arc::new(move || fixed));
        (coordinator, database, dir, fixed)
    }

    fn fields(department_id: i64) -> EmployeeFields {
        EmployeeFields {
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            phone: "555-0101".to_string(),
            address: "1 Harbor Rd".to_string(),
            avatar: None,
            hire_date: NaiveDate::from_ymd_opt(2020, 1, 2).unwrap(),
            is_active: true,
            department_id,
        }
    }

    async fn seed_employee(database: &Database, department_id: i64) -> i64 {
        let mut tx = database.begin_write().await.expect("begin");
        let id = database
            .employees()
            .insert(&mut tx, &fields(department_id))
            .await
            .expect("insert");
        tx.commit().await.expect("commit");
        id
    }

    async fn history_count(database: &Database, employee_id: i64) -> u64 {
        database
            .department_histories()
            .count_for_employee(employee_id)
            .await
            .expect("count")
    }

    #[tokio::test]
    async fn records_transfer_with_clock_timestamp() {
        let (coordinator, database, _dir, fixed) = setup().await;
        let id = seed_employee(&database, 1).await;

        let applied = coordinator
            .apply_update(id, &fields(3))
            .await
            .expect("apply update");

        let recorded = applied.transfer.expect("transfer recorded");
        assert_eq!(recorded.transfer.old_department_id, 1);
        assert_eq!(recorded.transfer.new_department_id, 3);
        assert_eq!(recorded.change_date, fixed);

        let rows = database
            .department_histories()
            .list_for_employee(id)
            .await
            .expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, recorded.history_id);
        assert_eq!(rows[0].change_date, fixed);
    }

    #[tokio::test]
    async fn same_department_overwrites_fields_without_history() {
        let (coordinator, database, _dir, _) = setup().await;
        let id = seed_employee(&database, 2).await;

        let mut changed = fields(2);
        changed.is_active = false;
        changed.avatar = Some("https://cdn.example.com/grace.png".to_string());
        let applied = coordinator.apply_update(id, &changed).await.expect("apply");

        assert!(applied.transfer.is_none());
        assert_eq!(history_count(&database, id).await, 0);
        let row = database.employees().fetch(id).await.expect("fetch").expect("exists");
        assert!(!row.is_active);
        assert_eq!(row.avatar.as_deref(), Some("https://cdn.example.com/grace.png"));
    }

    #[tokio::test]
    async fn missing_employee_is_not_found() {
        let (coordinator, _database, _dir, _) = setup().await;
        let err = coordinator.apply_update(404, &fields(2)).await.unwrap_err();
        assert!(matches!(
            err,
            RecordError::NotFound {
                entity: "employee",
                id: 404
            }
        ));
    }

    #[tokio::test]
    async fn unknown_department_rolls_back_without_history() {
        let (coordinator, database, _dir, _) = setup().await;
        let id = seed_employee(&database, 1).await;

        let err = coordinator.apply_update(id, &fields(77)).await.unwrap_err();
        assert!(matches!(
            err,
            RecordError::NotFound {
                entity: "department",
                id: 77
            }
        ));
        assert_eq!(history_count(&database, id).await, 0);
        let row = database.employees().fetch(id).await.expect("fetch").expect("exists");
        assert_eq!(row.department_id, 1);
    }

    #[tokio::test]
    async fn failed_employee_write_discards_the_new_history_row() {
        let (coordinator, database, _dir, _) = setup().await;
        let id = seed_employee(&database, 1).await;
        sqlx::query(
            "CREATE TRIGGER reject_employee_update BEFORE UPDATE ON employees \
             BEGIN SELECT RAISE(ABORT, 'employee update rejected'); END",
        )
        .execute(database.pool())
        .await
        .expect("create trigger");

        let err = coordinator.apply_update(id, &fields(2)).await.unwrap_err();
        assert!(matches!(
            err,
            RecordError::Internal(StoreFailure::Employees(EmployeeError::Database(_)))
        ));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(history_count(&database, id).await, 0);
        let row = database.employees().fetch(id).await.expect("fetch").expect("exists");
        assert_eq!(row.department_id, 1);
    }
}
