// File: console/status_engine/src/action.rs

use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};

use crate::error::EngineError;

/// How the dashboard waits for an action to finish.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Fire-and-forget; completion arrives later through the change feed.
    Control,
    /// Plain request/response, no follow-on subscription.
    Query,
}

/// Every webhook action the console can issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CreateVm,
    HibernateVm,
    RestoreVm,
    DeleteVm,
    RunSimulation,
    PauseSimulation,
    ResumeSimulation,
    StopSimulation,
    ShowCredits,
    CheckVmStatus,
    ListVolumes,
    AttachVolume,
    DetachVolume,
    ProjectIdCheck,
    GetProjectName,
    AddSshKey,
}

impl Action {
    pub const ALL: [Action; 16] = [
        Action::CreateVm,
        Action::HibernateVm,
        Action::RestoreVm,
        Action::DeleteVm,
        Action::RunSimulation,
        Action::PauseSimulation,
        Action::ResumeSimulation,
        Action::StopSimulation,
        Action::ShowCredits,
        Action::CheckVmStatus,
        Action::ListVolumes,
        Action::AttachVolume,
        Action::DetachVolume,
        Action::ProjectIdCheck,
        Action::GetProjectName,
        Action::AddSshKey,
    ];

    /// Webhook path segment, also the name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CreateVm => "create_vm",
            Action::HibernateVm => "hibernate_vm",
            Action::RestoreVm => "restore_vm",
            Action::DeleteVm => "delete_vm",
            Action::RunSimulation => "run_simulation",
            Action::PauseSimulation => "pause_simulation",
            Action::ResumeSimulation => "resume_simulation",
            Action::StopSimulation => "stop_simulation",
            Action::ShowCredits => "show_credits",
            Action::CheckVmStatus => "check_vm_status",
            Action::ListVolumes => "list_volumes",
            Action::AttachVolume => "attach_volume",
            Action::DetachVolume => "detach_volume",
            Action::ProjectIdCheck => "project_id_check",
            Action::GetProjectName => "get_project_name",
            Action::AddSshKey => "add_ssh_key",
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::CreateVm
            | Action::HibernateVm
            | Action::RestoreVm
            | Action::DeleteVm
            | Action::RunSimulation
            | Action::PauseSimulation
            | Action::ResumeSimulation
            | Action::StopSimulation => ActionKind::Control,
            _ => ActionKind::Query,
        }
    }

    pub fn is_control(&self) -> bool {
        self.kind() == ActionKind::Control
    }

    /// The `request_status` that ends monitoring successfully for this action.
    ///
    /// This is the only place the mapping lives. Actions returning `None`
    /// settle only through a failure status or the monitor timeout.
    pub fn terminal_success(&self) -> Option<&'static str> {
        match self {
            Action::CreateVm => Some("running"),
            Action::HibernateVm => Some("hibernated"),
            Action::RestoreVm => Some("running"),
            Action::StopSimulation => Some("deleted"),
            Action::DeleteVm => Some("deleted"),
            _ => None,
        }
    }

    /// Short progress label shown while the action is in flight.
    pub fn label(&self) -> &'static str {
        match self {
            Action::CreateVm => "VM is Creating",
            Action::HibernateVm => "VM is Hibernating",
            Action::RestoreVm => "VM is Restoring",
            Action::DeleteVm => "VM is getting deleted",
            Action::StopSimulation => "VM is getting deleted",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| EngineError::UnknownAction(s.to_string()))
    }
}
