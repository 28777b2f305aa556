// File: console/vm_console/src/presenter.rs
// Where classification results end up. The core never renders anything
// itself; it only calls into a sink.

use colored::*;
use status_engine::{status_label, Action, StatusPayload};

pub trait PresentationSink: Send + Sync {
    /// Every delivered row, terminal or not.
    fn progress(&self, payload: &StatusPayload, action: Action);

    /// The operation for this row just resolved.
    fn success(&self, payload: &StatusPayload, action: Action);

    /// The operation just rejected with `message`.
    fn failure(&self, message: &str, action: Action);

    /// Monitoring stopped without an outcome (timeout); clear spinners.
    fn loading_finished(&self);
}

// Prints status lines to the terminal
#[derive(Debug, Default, Clone)]
pub struct ConsolePresenter {
    pub verbose: bool,
}

impl ConsolePresenter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    fn details(&self, payload: &StatusPayload) {
        let fields = [
            ("VM name", payload.user_vm_name.as_deref()),
            ("VM id", payload.user_vm_id.as_deref()),
            ("VM IP", payload.user_vm_ip.as_deref()),
            ("Environment", payload.environment_name.as_deref()),
            ("GPU type", payload.gpu_type.as_deref()),
            ("SSH key", payload.ssh_key_name.as_deref()),
        ];

        for (label, value) in fields {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                println!("    {:<12} {}", format!("{}:", label).dimmed(), value);
            }
        }

        if let Some(cost) = payload.cost.as_ref().filter(|c| !c.is_null()) {
            println!("    {:<12} {}", "Cost:".dimmed(), cost);
        }

        if let Some(updated) = payload.updated_at_utc() {
            println!("    {:<12} {}", "Updated:".dimmed(), updated.format("%Y-%m-%d %H:%M:%S UTC"));
        }

        if self.verbose {
            for (key, value) in payload.extra.iter() {
                println!("    {:<12} {}", format!("{}:", key).dimmed(), value);
            }
        }
    }
}

impl PresentationSink for ConsolePresenter {
    fn progress(&self, payload: &StatusPayload, action: Action) {
        let status = payload.status().unwrap_or("unknown");
        println!("{} [{}] {}", "…".blue(), action.label().bold(), status_label(status));
    }

    fn success(&self, payload: &StatusPayload, action: Action) {
        println!("{} {} completed successfully!", "✓".green().bold(), action);
        self.details(payload);
    }

    fn failure(&self, message: &str, action: Action) {
        eprintln!("{} {} failed: {}", "✗".red().bold(), action, message.red());
    }

    fn loading_finished(&self) {
        println!("{}", "Stopped monitoring.".yellow());
    }
}
