use std::{str::FromStr, time::Duration};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Row, Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;

use staffbook_core::{Department, DepartmentHistory, Employee, EmployeeFields};

const SQLITE_CONSTRAINT_FOREIGNKEY: &str = "787";
const TAKE_WRITE_LOCK: &str = "UPDATE departments SET name = name WHERE 0";

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    ///
    /// The database file is created when missing. Every pooled connection enforces
    /// foreign keys and runs in WAL mode.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Begins a write transaction. Dropping it without commit rolls back.
    ///
    /// The first statement takes SQLite's write lock, so concurrent writers wait
    /// on the busy timeout up front and never hold a stale read snapshot.
    pub async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(TAKE_WRITE_LOCK).execute(&mut *tx).await?;
        Ok(tx)
    }

    /// Returns a handle for reading departments.
    pub fn departments(&self) -> DepartmentRepository {
        DepartmentRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for interacting with employee rows.
    pub fn employees(&self) -> EmployeeRepository {
        EmployeeRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for the department change audit trail.
    pub fn department_histories(&self) -> DepartmentHistoryRepository {
        DepartmentHistoryRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
}

/// Repository used to query departments.
#[derive(Clone)]
pub struct DepartmentRepository {
    pool: SqlitePool,
}

impl DepartmentRepository {
    /// Lists every department ordered by id.
    pub async fn list(&self) -> Result<Vec<Department>, DepartmentError> {
        let rows = sqlx::query_as::<_, DepartmentRow>("SELECT id, name FROM departments ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(DepartmentRow::into_domain).collect())
    }

    /// Returns `true` when the department exists, as seen by the transaction.
    pub async fn exists(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        department_id: i64,
    ) -> Result<bool, DepartmentError> {
        let row = sqlx::query("SELECT 1 FROM departments WHERE id = ?")
            .bind(department_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.is_some())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DepartmentRow {
    id: i64,
    name: String,
}

impl DepartmentRow {
    fn into_domain(self) -> Department {
        Department {
            id: self.id,
            name: self.name,
        }
    }
}

/// Errors that can occur while reading departments.
#[derive(Debug, Error)]
pub enum DepartmentError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

const EMPLOYEE_COLUMNS: &str = "SELECT e.id, e.first_name, e.last_name, e.phone, e.address, e.avatar, \
     e.hire_date, e.is_active, e.department_id, d.name AS department_name \
     FROM employees AS e \
     JOIN departments AS d ON d.id = e.department_id";

/// Repository for employee rows.
#[derive(Clone)]
pub struct EmployeeRepository {
    pool: SqlitePool,
}

impl EmployeeRepository {
    /// Counts all employees.
    pub async fn count(&self) -> Result<u64, EmployeeError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM employees")
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = row.get("total");
        Ok(total as u64)
    }

    /// Lists one window of employees ordered by id, joined with their department.
    pub async fn list_page(
        &self,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<EmployeeRow>, EmployeeError> {
        let rows = sqlx::query_as::<_, EmployeeRow>(&format!(
            "{EMPLOYEE_COLUMNS} ORDER BY e.id ASC LIMIT ? OFFSET ?"
        ))
        .bind(i64::from(limit))
        .bind(to_sql_offset(offset))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Loads a single employee joined with its department.
    pub async fn fetch(&self, employee_id: i64) -> Result<Option<EmployeeRow>, EmployeeError> {
        let row = sqlx::query_as::<_, EmployeeRow>(&format!("{EMPLOYEE_COLUMNS} WHERE e.id = ?"))
            .bind(employee_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    /// Returns `true` when the employee exists.
    pub async fn exists(&self, employee_id: i64) -> Result<bool, EmployeeError> {
        let row = sqlx::query("SELECT 1 FROM employees WHERE id = ?")
            .bind(employee_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Reads the employee's current department inside a write transaction.
    ///
    /// Returns `None` when the employee does not exist.
    pub async fn current_department_id(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        employee_id: i64,
    ) -> Result<Option<i64>, EmployeeError> {
        let row = sqlx::query("SELECT department_id FROM employees WHERE id = ?")
            .bind(employee_id)
            .fetch_optional(&mut **tx)
            .await?;

        Ok(row.map(|row| row.get("department_id")))
    }

    /// Inserts a new employee and returns the assigned id.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        fields: &EmployeeFields,
    ) -> Result<i64, EmployeeError> {
        let row = sqlx::query(
            "INSERT INTO employees \
             (first_name, last_name, phone, address, avatar, hire_date, is_active, department_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(&fields.first_name)
        .bind(&fields.last_name)
        .bind(&fields.phone)
        .bind(&fields.address)
        .bind(&fields.avatar)
        .bind(to_sql_date(fields.hire_date))
        .bind(fields.is_active)
        .bind(fields.department_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(EmployeeError::from_write)?;

        Ok(row.get("id"))
    }

    /// Overwrites every mutable column of the employee, returning the affected row count.
    pub async fn update(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        employee_id: i64,
        fields: &EmployeeFields,
    ) -> Result<u64, EmployeeError> {
        let result = sqlx::query(
            "UPDATE employees \
             SET first_name = ?, last_name = ?, phone = ?, address = ?, avatar = ?, \
                 hire_date = ?, is_active = ?, department_id = ? \
             WHERE id = ?",
        )
        .bind(&fields.first_name)
        .bind(&fields.last_name)
        .bind(&fields.phone)
        .bind(&fields.address)
        .bind(&fields.avatar)
        .bind(to_sql_date(fields.hire_date))
        .bind(fields.is_active)
        .bind(fields.department_id)
        .bind(employee_id)
        .execute(&mut **tx)
        .await
        .map_err(EmployeeError::from_write)?;

        Ok(result.rows_affected())
    }

    /// Deletes the employee row. History rows must already be gone.
    pub async fn delete(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        employee_id: i64,
    ) -> Result<u64, EmployeeError> {
        let result = sqlx::query("DELETE FROM employees WHERE id = ?")
            .bind(employee_id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Employee row joined with its department name.
#[derive(Debug, sqlx::FromRow)]
pub struct EmployeeRow {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub address: String,
    pub avatar: Option<String>,
    pub hire_date: NaiveDate,
    pub is_active: bool,
    pub department_id: i64,
    pub department_name: String,
}

impl EmployeeRow {
    /// Converts the row into a domain employee embedding its current department.
    pub fn into_domain(self) -> Employee {
        Employee {
            id: self.id,
            first_name: self.first_name,
            last_name: self.last_name,
            phone: self.phone,
            address: self.address,
            avatar: self.avatar,
            hire_date: self.hire_date,
            is_active: self.is_active,
            department_id: self.department_id,
            department: Some(Department {
                id: self.department_id,
                name: self.department_name,
            }),
            department_histories: None,
        }
    }
}

/// Errors that can occur while reading or mutating employees.
#[derive(Debug, Error)]
pub enum EmployeeError {
    #[error("referenced department does not exist")]
    MissingDepartment,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EmployeeError {
    fn from_write(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err)
                if db_err.code().as_deref() == Some(SQLITE_CONSTRAINT_FOREIGNKEY) =>
            {
                Self::MissingDepartment
            }
            other => Self::Database(other),
        }
    }
}

const HISTORY_COLUMNS: &str = "SELECT h.id, h.employee_id, \
     h.old_department_id, od.name AS old_department_name, \
     h.new_department_id, nd.name AS new_department_name, \
     h.change_date \
     FROM department_histories AS h \
     JOIN departments AS od ON od.id = h.old_department_id \
     JOIN departments AS nd ON nd.id = h.new_department_id \
     WHERE h.employee_id = ? \
     ORDER BY h.change_date ASC, h.id ASC";

/// Repository for the department change audit trail.
#[derive(Clone)]
pub struct DepartmentHistoryRepository {
    pool: SqlitePool,
}

impl DepartmentHistoryRepository {
    /// Appends a history row and returns its id.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &NewDepartmentHistory,
    ) -> Result<i64, DepartmentHistoryError> {
        let row = sqlx::query(
            "INSERT INTO department_histories \
             (employee_id, old_department_id, new_department_id, change_date) \
             VALUES (?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(record.employee_id)
        .bind(record.old_department_id)
        .bind(record.new_department_id)
        .bind(to_rfc3339(record.change_date))
        .fetch_one(&mut **tx)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err)
                if db_err.code().as_deref() == Some(SQLITE_CONSTRAINT_FOREIGNKEY) =>
            {
                DepartmentHistoryError::MissingReference
            }
            other => DepartmentHistoryError::Database(other),
        })?;

        Ok(row.get("id"))
    }

    /// Lists the complete history of one employee in chronological order.
    pub async fn list_for_employee(
        &self,
        employee_id: i64,
    ) -> Result<Vec<DepartmentHistoryRow>, DepartmentHistoryError> {
        let rows = sqlx::query_as::<_, DepartmentHistoryRow>(HISTORY_COLUMNS)
            .bind(employee_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Lists one window of an employee's history in chronological order.
    pub async fn list_page_for_employee(
        &self,
        employee_id: i64,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<DepartmentHistoryRow>, DepartmentHistoryError> {
        let rows =
            sqlx::query_as::<_, DepartmentHistoryRow>(&format!("{HISTORY_COLUMNS} LIMIT ? OFFSET ?"))
                .bind(employee_id)
                .bind(i64::from(limit))
                .bind(to_sql_offset(offset))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    /// Counts the history rows recorded for one employee.
    pub async fn count_for_employee(&self, employee_id: i64) -> Result<u64, DepartmentHistoryError> {
        let row =
            sqlx::query("SELECT COUNT(*) AS total FROM department_histories WHERE employee_id = ?")
                .bind(employee_id)
                .fetch_one(&self.pool)
                .await?;
        let total: i64 = row.get("total");
        Ok(total as u64)
    }

    /// Removes every history row of the employee, returning how many were deleted.
    pub async fn delete_for_employee(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        employee_id: i64,
    ) -> Result<u64, DepartmentHistoryError> {
        let result = sqlx::query("DELETE FROM department_histories WHERE employee_id = ?")
            .bind(employee_id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Payload required to append a history row.
#[derive(Debug, Clone)]
pub struct NewDepartmentHistory {
    pub employee_id: i64,
    pub old_department_id: i64,
    pub new_department_id: i64,
    pub change_date: DateTime<Utc>,
}

/// History row joined with both department names.
#[derive(Debug, sqlx::FromRow)]
pub struct DepartmentHistoryRow {
    pub id: i64,
    pub employee_id: i64,
    pub old_department_id: i64,
    pub old_department_name: String,
    pub new_department_id: i64,
    pub new_department_name: String,
    pub change_date: DateTime<Utc>,
}

impl DepartmentHistoryRow {
    /// Converts the row into a domain history record embedding both departments.
    pub fn into_domain(self) -> DepartmentHistory {
        DepartmentHistory {
            id: self.id,
            employee_id: self.employee_id,
            old_department_id: self.old_department_id,
            new_department_id: self.new_department_id,
            change_date: self.change_date,
            old_department: Some(Department {
                id: self.old_department_id,
                name: self.old_department_name,
            }),
            new_department: Some(Department {
                id: self.new_department_id,
                name: self.new_department_name,
            }),
        }
    }
}

/// Errors that can occur while reading or appending history rows.
#[derive(Debug, Error)]
pub enum DepartmentHistoryError {
    #[error("history row references a missing employee or department")]
    MissingReference,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn to_sql_date(value: NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

fn to_sql_offset(offset: u64) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}
