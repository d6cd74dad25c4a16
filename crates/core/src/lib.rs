//! Domain layer for the employee records service.
//!
//! Holds the record types shared by storage and the HTTP application, the
//! input validation that runs before any datastore call, and the pure
//! department-transfer rules.
pub mod pagination;
pub mod transfer;
pub mod types;
pub mod validation;

pub use pagination::Pagination;
pub use transfer::{check_history_chain, plan_transfer, DepartmentTransfer, HistoryChainError};
pub use types::{
    DeleteConfirmation, Department, DepartmentHistory, Employee, EmployeeFields, EmployeePage,
    HistoryPage,
};
pub use validation::{FieldError, ValidationErrors};
