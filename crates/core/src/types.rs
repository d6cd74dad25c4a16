use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Organizational unit referenced by employees and history rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: i64,
    pub name: String,
}

/// Employee record as exposed by the API.
///
/// `department` and `department_histories` are only populated by the reads that
/// join them; they are omitted from the payload otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub hire_date: NaiveDate,
    pub is_active: bool,
    pub department_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<Department>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_histories: Option<Vec<DepartmentHistory>>,
}

/// Validated employee field set used by create and update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmployeeFields {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub address: String,
    pub avatar: Option<String>,
    pub hire_date: NaiveDate,
    pub is_active: bool,
    pub department_id: i64,
}

/// Immutable audit record of one department transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentHistory {
    pub id: i64,
    pub employee_id: i64,
    pub old_department_id: i64,
    pub new_department_id: i64,
    pub change_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_department: Option<Department>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_department: Option<Department>,
}

/// One page of employees plus the unfiltered total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeePage {
    pub employees: Vec<Employee>,
    pub total_employees: u64,
}

/// One page of an employee's department history plus the total for that employee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub histories: Vec<DepartmentHistory>,
    pub total_histories: u64,
}

/// Body returned after an employee has been removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteConfirmation {
    pub message: String,
}

impl DeleteConfirmation {
    pub fn employee_deleted() -> Self {
        Self {
            message: "Employee deleted successfully".to_string(),
        }
    }
}
