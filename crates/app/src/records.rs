use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, warn};

use staffbook_core::{
    check_history_chain, DeleteConfirmation, Department, Employee, EmployeeFields, EmployeePage,
    HistoryPage, Pagination, ValidationErrors,
};
use staffbook_storage::{
    Database, DepartmentError, DepartmentHistoryError, DepartmentHistoryRow, EmployeeError,
    EmployeeRow,
};

use crate::coordinator::{Clock, DepartmentHistoryCoordinator};

/// Employee and department-history operations exposed to the API layer.
#[derive(Clone)]
pub struct EmployeeRecordStore {
    database: Database,
    coordinator: DepartmentHistoryCoordinator,
}

impl EmployeeRecordStore {
    pub fn new(database: Database, clock: Clock) -> Self {
        let coordinator = DepartmentHistoryCoordinator::new(database.clone(), clock);
        Self {
            database,
            coordinator,
        }
    }

    /// Returns one page of employees ordered by id, with the unfiltered total.
    pub async fn list(&self, pagination: Pagination) -> Result<EmployeePage, RecordError> {
        let repo = self.database.employees();
        let total_employees = repo.count().await?;
        let employees = repo
            .list_page(pagination.limit(), pagination.offset())
            .await?
            .into_iter()
            .map(EmployeeRow::into_domain)
            .collect();
        debug!(
            stage = "records",
            page = pagination.page(),
            pages = pagination.page_count(total_employees),
            total_employees,
            "employee page listed"
        );

        Ok(EmployeePage {
            employees,
            total_employees,
        })
    }

    /// Loads an employee with its department and full transfer history.
    pub async fn get_one(&self, employee_id: i64) -> Result<Employee, RecordError> {
        let mut employee = self
            .database
            .employees()
            .fetch(employee_id)
            .await?
            .ok_or(RecordError::employee_not_found(employee_id))?
            .into_domain();

        let histories: Vec<_> = self
            .database
            .department_histories()
            .list_for_employee(employee_id)
            .await?
            .into_iter()
            .map(DepartmentHistoryRow::into_domain)
            .collect();

        if let Err(err) = check_history_chain(employee_id, employee.department_id, &histories) {
            warn!(stage = "records", employee_id, error = %err, "department history chain is inconsistent");
        }

        employee.department_histories = Some(histories);
        Ok(employee)
    }

    /// Inserts a new employee. No history is recorded for the initial department.
    pub async fn create(&self, fields: &EmployeeFields) -> Result<Employee, RecordError> {
        let mut tx = self.database.begin_write().await?;
        if !self
            .database
            .departments()
            .exists(&mut tx, fields.department_id)
            .await?
        {
            return Err(RecordError::department_not_found(fields.department_id));
        }
        let employee_id = self.database.employees().insert(&mut tx, fields).await?;
        tx.commit().await?;

        counter!("employee_mutations_total", "op" => "create").increment(1);
        info!(stage = "records", employee_id, department_id = fields.department_id, "employee created");

        self.database
            .employees()
            .fetch(employee_id)
            .await?
            .map(EmployeeRow::into_domain)
            .ok_or(RecordError::employee_not_found(employee_id))
    }

    /// Overwrites every mutable field of the employee, recording a department
    /// transfer when `departmentId` changes.
    pub async fn update(
        &self,
        employee_id: i64,
        fields: &EmployeeFields,
    ) -> Result<Employee, RecordError> {
        let applied = self.coordinator.apply_update(employee_id, fields).await?;

        counter!("employee_mutations_total", "op" => "update").increment(1);
        info!(
            stage = "records",
            employee_id,
            transferred = applied.transfer.is_some(),
            "employee updated"
        );

        self.get_one(applied.employee_id).await
    }

    /// Deletes the employee after removing its history rows, in one transaction.
    pub async fn delete(&self, employee_id: i64) -> Result<DeleteConfirmation, RecordError> {
        let employees = self.database.employees();
        let mut tx = self.database.begin_write().await?;

        if employees
            .current_department_id(&mut tx, employee_id)
            .await?
            .is_none()
        {
            return Err(RecordError::employee_not_found(employee_id));
        }

        let removed_histories = self
            .database
            .department_histories()
            .delete_for_employee(&mut tx, employee_id)
            .await?;
        let deleted = employees.delete(&mut tx, employee_id).await?;
        if deleted == 0 {
            return Err(RecordError::employee_not_found(employee_id));
        }
        tx.commit().await?;

        counter!("employee_mutations_total", "op" => "delete").increment(1);
        info!(stage = "records", employee_id, removed_histories, "employee deleted");

        Ok(DeleteConfirmation::employee_deleted())
    }

    /// Returns one page of an employee's transfers in chronological order.
    pub async fn list_department_history(
        &self,
        employee_id: i64,
        pagination: Pagination,
    ) -> Result<HistoryPage, RecordError> {
        if !self.database.employees().exists(employee_id).await? {
            return Err(RecordError::employee_not_found(employee_id));
        }

        let repo = self.database.department_histories();
        let total_histories = repo.count_for_employee(employee_id).await?;
        let histories = repo
            .list_page_for_employee(employee_id, pagination.limit(), pagination.offset())
            .await?
            .into_iter()
            .map(DepartmentHistoryRow::into_domain)
            .collect();
        debug!(
            stage = "records",
            employee_id,
            page = pagination.page(),
            pages = pagination.page_count(total_histories),
            total_histories,
            "department history page listed"
        );

        Ok(HistoryPage {
            histories,
            total_histories,
        })
    }

    pub async fn list_departments(&self) -> Result<Vec<Department>, RecordError> {
        Ok(self.database.departments().list().await?)
    }
}

/// Failure kinds reported by record operations.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("internal error: {0}")]
    Internal(#[from] StoreFailure),
}

/// Datastore failures that surface as internal errors.
#[derive(Debug, Error)]
pub enum StoreFailure {
    #[error("transaction failed: {0}")]
    Transaction(#[from] sqlx::Error),
    #[error("employee storage failed: {0}")]
    Employees(#[from] EmployeeError),
    #[error("department storage failed: {0}")]
    Departments(#[from] DepartmentError),
    #[error("department history storage failed: {0}")]
    Histories(#[from] DepartmentHistoryError),
    #[error("update of employee {employee_id} affected {affected} rows")]
    UnexpectedRowCount { employee_id: i64, affected: u64 },
}

impl RecordError {
    pub fn employee_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "employee",
            id,
        }
    }

    pub fn department_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "department",
            id,
        }
    }

    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for RecordError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(err.into())
    }
}

impl From<EmployeeError> for RecordError {
    fn from(err: EmployeeError) -> Self {
        Self::Internal(err.into())
    }
}

impl From<DepartmentError> for RecordError {
    fn from(err: DepartmentError) -> Self {
        Self::Internal(err.into())
    }
}

impl From<DepartmentHistoryError> for RecordError {
    fn from(err: DepartmentHistoryError) -> Self {
        Self::Internal(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use chrono::{NaiveDate, Utc};
    use serde_json::json;
    use staffbook_core::validation::validate_employee;
    use tempfile::TempDir;

    async fn setup_store() -> (EmployeeRecordStore, Database, TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("records.db").display());
        let database = Database::connect(&url).await.expect("connect");
        database.run_migrations().await.expect("migrations");
        let store = EmployeeRecordStore::new(database.clone(), Arc::new(Utc::now));
        (store, database, dir)
    }

    fn john_doe(department_id: i64) -> EmployeeFields {
        validate_employee(&json!({
            "firstName": "John",
            "lastName": "Doe",
            "departmentId": department_id,
            "hireDate": "2023-05-18",
            "phone": "555-555-5555",
            "address": "123 Main St",
            "avatar": "http://x/a.png"
        }))
        .expect("valid payload")
    }

    fn numbered(n: usize) -> EmployeeFields {
        EmployeeFields {
            first_name: format!("Employee{n}"),
            last_name: "Test".to_string(),
            phone: format!("555-01{n:02}"),
            address: format!("{n} Test Street"),
            avatar: None,
            hire_date: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            is_active: true,
            department_id: (n % 3 + 1) as i64,
        }
    }

    async fn history_count(database: &Database, employee_id: i64) -> u64 {
        database
            .department_histories()
            .count_for_employee(employee_id)
            .await
            .expect("count")
    }

    #[tokio::test]
    async fn transfer_lifecycle_keeps_history_in_step() {
        let (store, database, _dir) = setup_store().await;

        let created = store.create(&john_doe(1)).await.expect("create");
        assert!(created.is_active);
        assert_eq!(created.department_id, 1);
        assert_eq!(history_count(&database, created.id).await, 0);

        let moved = store.update(created.id, &john_doe(2)).await.expect("update");
        assert_eq!(moved.department_id, 2);
        let histories = moved.department_histories.expect("histories loaded");
        assert_eq!(histories.len(), 1);
        assert_eq!(histories[0].old_department_id, 1);
        assert_eq!(histories[0].new_department_id, 2);

        let unchanged = store.update(created.id, &john_doe(2)).await.expect("update");
        assert_eq!(unchanged.department_histories.map(|h| h.len()), Some(1));
        assert_eq!(history_count(&database, created.id).await, 1);

        let confirmation = store.delete(created.id).await.expect("delete");
        assert_eq!(confirmation.message, "Employee deleted successfully");
        assert_eq!(history_count(&database, created.id).await, 0);

        let err = store.get_one(created.id).await.unwrap_err();
        assert!(matches!(err, RecordError::NotFound { entity: "employee", .. }));
    }

    #[tokio::test]
    async fn create_then_get_one_preserves_fields() {
        let (store, _database, _dir) = setup_store().await;
        let input = john_doe(3);

        let created = store.create(&input).await.expect("create");
        let loaded = store.get_one(created.id).await.expect("get one");

        assert_eq!(loaded.first_name, input.first_name);
        assert_eq!(loaded.last_name, input.last_name);
        assert_eq!(loaded.phone, input.phone);
        assert_eq!(loaded.address, input.address);
        assert_eq!(loaded.avatar, input.avatar);
        assert_eq!(loaded.hire_date, input.hire_date);
        assert_eq!(loaded.department_id, 3);
        assert!(loaded.is_active);
        assert_eq!(loaded.department.map(|d| d.name), Some("Marketing".to_string()));
        assert_eq!(loaded.department_histories, Some(Vec::new()));
    }

    #[tokio::test]
    async fn create_rejects_unknown_department() {
        let (store, _database, _dir) = setup_store().await;
        let err = store.create(&john_doe(12)).await.unwrap_err();
        assert!(matches!(
            err,
            RecordError::NotFound {
                entity: "department",
                id: 12
            }
        ));
        let page = store.list(Pagination::default()).await.expect("list");
        assert_eq!(page.total_employees, 0);
    }

    #[tokio::test]
    async fn update_of_missing_employee_writes_nothing() {
        let (store, database, _dir) = setup_store().await;
        let err = store.update(999, &john_doe(2)).await.unwrap_err();
        assert!(matches!(err, RecordError::NotFound { entity: "employee", id: 999 }));
        assert_eq!(history_count(&database, 999).await, 0);
    }

    #[tokio::test]
    async fn repeated_transfers_form_a_chain() {
        let (store, _database, _dir) = setup_store().await;
        let created = store.create(&john_doe(1)).await.expect("create");

        for department_id in [2, 2, 3, 1, 1, 3] {
            store
                .update(created.id, &john_doe(department_id))
                .await
                .expect("update");
        }

        let loaded = store.get_one(created.id).await.expect("get one");
        let histories = loaded.department_histories.expect("histories");
        let transitions: Vec<_> = histories
            .iter()
            .map(|h| (h.old_department_id, h.new_department_id))
            .collect();
        assert_eq!(transitions, vec![(1, 2), (2, 3), (3, 1), (1, 3)]);
        assert!(check_history_chain(created.id, loaded.department_id, &histories).is_ok());
    }

    #[tokio::test]
    async fn pages_partition_all_employees() {
        let (store, _database, _dir) = setup_store().await;
        let mut expected = Vec::new();
        for n in 0..12 {
            expected.push(store.create(&numbered(n)).await.expect("create").id);
        }

        let limit = 5;
        let first = store
            .list(Pagination::new(1, limit).unwrap())
            .await
            .expect("list");
        assert_eq!(first.total_employees, 12);
        let pages = Pagination::new(1, limit).unwrap().page_count(first.total_employees);
        assert_eq!(pages, 3);

        let mut seen = Vec::new();
        for page in 1..=pages as u32 {
            let result = store
                .list(Pagination::new(page, limit).unwrap())
                .await
                .expect("list");
            assert!(result.employees.len() <= limit as usize);
            assert_eq!(result.total_employees, 12);
            seen.extend(result.employees.into_iter().map(|e| e.id));
        }

        let unique: HashSet<_> = seen.iter().copied().collect();
        assert_eq!(unique.len(), seen.len());
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn out_of_range_page_is_empty_with_true_total() {
        let (store, _database, _dir) = setup_store().await;
        store.create(&numbered(1)).await.expect("create");

        let page = store
            .list(Pagination::new(4, 5).unwrap())
            .await
            .expect("list");
        assert!(page.employees.is_empty());
        assert_eq!(page.total_employees, 1);
    }

    #[tokio::test]
    async fn list_embeds_current_department() {
        let (store, _database, _dir) = setup_store().await;
        store.create(&john_doe(2)).await.expect("create");

        let page = store.list(Pagination::default()).await.expect("list");
        let department = page.employees[0].department.clone().expect("department");
        assert_eq!(department.name, "Human Resources");
        assert!(page.employees[0].department_histories.is_none());
    }

    #[tokio::test]
    async fn delete_twice_is_not_found() {
        let (store, _database, _dir) = setup_store().await;
        let created = store.create(&john_doe(1)).await.expect("create");
        store.update(created.id, &john_doe(3)).await.expect("update");

        store.delete(created.id).await.expect("first delete");
        let err = store.delete(created.id).await.unwrap_err();
        assert!(matches!(err, RecordError::NotFound { entity: "employee", .. }));
    }

    #[tokio::test]
    async fn delete_leaves_other_histories_untouched() {
        let (store, database, _dir) = setup_store().await;
        let keep = store.create(&john_doe(1)).await.expect("create");
        let remove = store.create(&john_doe(1)).await.expect("create");
        store.update(keep.id, &john_doe(2)).await.expect("update");
        store.update(remove.id, &john_doe(3)).await.expect("update");

        store.delete(remove.id).await.expect("delete");

        assert_eq!(history_count(&database, keep.id).await, 1);
        assert_eq!(history_count(&database, remove.id).await, 0);
    }

    #[tokio::test]
    async fn history_listing_paginates_and_requires_employee() {
        let (store, _database, _dir) = setup_store().await;
        let created = store.create(&john_doe(1)).await.expect("create");
        for department_id in [2, 3, 1] {
            store
                .update(created.id, &john_doe(department_id))
                .await
                .expect("update");
        }

        let page = store
            .list_department_history(created.id, Pagination::new(2, 2).unwrap())
            .await
            .expect("history page");
        assert_eq!(page.total_histories, 3);
        assert_eq!(page.histories.len(), 1);
        assert_eq!(page.histories[0].old_department_id, 3);
        assert_eq!(
            page.histories[0].new_department.as_ref().map(|d| d.name.as_str()),
            Some("Engineering")
        );

        let err = store
            .list_department_history(created.id + 1, Pagination::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::NotFound { entity: "employee", .. }));
    }

    #[tokio::test]
    async fn departments_are_listed_in_id_order() {
        let (store, _database, _dir) = setup_store().await;
        let departments = store.list_departments().await.expect("departments");
        let ids: Vec<_> = departments.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failed_employee_delete_keeps_history_rows() {
        let (store, database, _dir) = setup_store().await;
        let created = store.create(&john_doe(1)).await.expect("create");
        store.update(created.id, &john_doe(2)).await.expect("update");
        sqlx::query(
            "CREATE TRIGGER reject_employee_delete BEFORE DELETE ON employees \
             BEGIN SELECT RAISE(ABORT, 'employee delete rejected'); END",
        )
        .execute(database.pool())
        .await
        .expect("create trigger");

        let err = store.delete(created.id).await.unwrap_err();
        assert!(matches!(err, RecordError::Internal(StoreFailure::Employees(_))));
        assert_eq!(history_count(&database, created.id).await, 1);
        let loaded = store.get_one(created.id).await.expect("employee survives");
        assert_eq!(loaded.department_id, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_all_succeed() {
        let (store, _database, _dir) = setup_store().await;

        let handles: Vec<_> = (0..60)
            .map(|n| {
                let store = store.clone();
                tokio::spawn(async move { store.create(&numbered(n)).await })
            })
            .collect();
        let mut ids = HashSet::new();
        for handle in handles {
            let created = handle.await.expect("task").expect("create");
            ids.insert(created.id);
        }

        assert_eq!(ids.len(), 60);
        let page = store.list(Pagination::default()).await.expect("list");
        assert_eq!(page.total_employees, 60);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_transfers_of_different_employees_all_succeed() {
        let (store, database, _dir) = setup_store().await;
        let mut ids = Vec::new();
        for _ in 0..30 {
            ids.push(store.create(&john_doe(1)).await.expect("create").id);
        }

        let handles: Vec<_> = ids
            .iter()
            .map(|&id| {
                let store = store.clone();
                tokio::spawn(async move { store.update(id, &john_doe(2)).await })
            })
            .collect();
        for handle in handles {
            let updated = handle.await.expect("task").expect("update");
            assert_eq!(updated.department_id, 2);
        }

        for id in ids {
            assert_eq!(history_count(&database, id).await, 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_transfers_of_one_employee_keep_the_chain_intact() {
        let (store, _database, _dir) = setup_store().await;
        let created = store.create(&john_doe(1)).await.expect("create");

        let handles: Vec<_> = (0..24)
            .map(|n| {
                let store = store.clone();
                let department_id = (n % 3 + 1) as i64;
                tokio::spawn(async move { store.update(created.id, &john_doe(department_id)).await })
            })
            .collect();
        for handle in handles {
            handle.await.expect("task").expect("update");
        }

        let loaded = store.get_one(created.id).await.expect("get one");
        let histories = loaded.department_histories.expect("histories");
        assert!(!histories.is_empty());
        assert!(check_history_chain(created.id, loaded.department_id, &histories).is_ok());
    }

    #[tokio::test]
    async fn stored_names_are_trimmed_and_empty_avatar_is_absent() {
        let (store, _database, _dir) = setup_store().await;
        let fields = validate_employee(&json!({
            "firstName": " John ",
            "lastName": "Doe\t",
            "departmentId": 1,
            "hireDate": "2023-05-18",
            "phone": " 555-555-5555 ",
            "address": "123 Main St",
            "avatar": ""
        }))
        .expect("valid payload");

        let created = store.create(&fields).await.expect("create");
        let loaded = store.get_one(created.id).await.expect("get one");

        assert_eq!(loaded.first_name, "John");
        assert_eq!(loaded.last_name, "Doe");
        assert_eq!(loaded.phone, " 555-555-5555 ");
        assert_eq!(loaded.avatar, None);
    }

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(RecordError::employee_not_found(1).kind(), "not_found");
        let internal = RecordError::from(StoreFailure::UnexpectedRowCount {
            employee_id: 1,
            affected: 0,
        });
        assert_eq!(internal.kind(), "internal");
        let validation = ValidationErrors::single("page", "expected a positive integer");
        assert_eq!(RecordError::from(validation).kind(), "validation");
    }
}
