use thiserror::Error;

use crate::types::DepartmentHistory;

/// Department change detected while applying an employee update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepartmentTransfer {
    pub employee_id: i64,
    pub old_department_id: i64,
    pub new_department_id: i64,
}

/// Decides whether moving `employee_id` to `target_department_id` is a transfer.
///
/// Returns `None` when the department is unchanged; no history is recorded then.
pub fn plan_transfer(
    employee_id: i64,
    current_department_id: i64,
    target_department_id: i64,
) -> Option<DepartmentTransfer> {
    if current_department_id == target_department_id {
        return None;
    }
    Some(DepartmentTransfer {
        employee_id,
        old_department_id: current_department_id,
        new_department_id: target_department_id,
    })
}

/// Ways an employee's history can disagree with its current department.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryChainError {
    #[error("history {history_id} belongs to employee {found}, expected {expected}")]
    ForeignRecord {
        history_id: i64,
        expected: i64,
        found: i64,
    },
    #[error("history {history_id} records a no-op transfer to department {department_id}")]
    NoOpTransfer { history_id: i64, department_id: i64 },
    #[error("history {history_id} starts at department {found}, expected {expected}")]
    Gap {
        history_id: i64,
        expected: i64,
        found: i64,
    },
    #[error("history ends at department {last}, employee is in department {current}")]
    StaleTail { last: i64, current: i64 },
}

/// Checks that `histories`, in chronological order, form a contiguous chain that
/// ends at `current_department_id`.
pub fn check_history_chain(
    employee_id: i64,
    current_department_id: i64,
    histories: &[DepartmentHistory],
) -> Result<(), HistoryChainError> {
    let mut previous: Option<i64> = None;
    for history in histories {
        if history.employee_id != employee_id {
            return Err(HistoryChainError::ForeignRecord {
                history_id: history.id,
                expected: employee_id,
                found: history.employee_id,
            });
        }
        if history.old_department_id == history.new_department_id {
            return Err(HistoryChainError::NoOpTransfer {
                history_id: history.id,
                department_id: history.new_department_id,
            });
        }
        if let Some(expected) = previous {
            if history.old_department_id != expected {
                return Err(HistoryChainError::Gap {
                    history_id: history.id,
                    expected,
                    found: history.old_department_id,
                });
            }
        }
        previous = Some(history.new_department_id);
    }

    match previous {
        Some(last) if last != current_department_id => Err(HistoryChainError::StaleTail {
            last,
            current: current_department_id,
        }),
        _ => Ok(()),
    }
}
