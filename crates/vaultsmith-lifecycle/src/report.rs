//! Expiration check reporting

use serde::Serialize;

/// Warning/critical day thresholds for expiration checks
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub warning_days: i64,
    pub critical_days: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning_days: 30,
            critical_days: 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Ok,
    Warning,
    Critical,
    /// No certificate on disk (or unreadable); needs generation
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpirationEntry {
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<i64>,
    pub status: CheckStatus,
}

impl ExpirationEntry {
    pub fn classify(service: &str, days: Option<i64>, thresholds: Thresholds) -> Self {
        let status = match days {
            None => CheckStatus::Missing,
            Some(d) if d < thresholds.critical_days => CheckStatus::Critical,
            Some(d) if d < thresholds.warning_days => CheckStatus::Warning,
            Some(_) => CheckStatus::Ok,
        };
        Self {
            service: service.to_string(),
            days_remaining: days,
            status,
        }
    }
}

/// Result of `check-expiration` across the catalog
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExpirationReport {
    pub entries: Vec<ExpirationEntry>,
}

impl ExpirationReport {
    fn worst(&self) -> CheckStatus {
        let mut worst = CheckStatus::Ok;
        for entry in &self.entries {
            worst = match (worst, entry.status) {
                (_, CheckStatus::Critical) | (_, CheckStatus::Missing) => CheckStatus::Critical,
                (CheckStatus::Ok, CheckStatus::Warning) => CheckStatus::Warning,
                (w, _) => w,
            };
        }
        worst
    }

    /// Plain/JSON mode: anything below a threshold is a warning exit.
    pub fn exit_code(&self) -> i32 {
        match self.worst() {
            CheckStatus::Ok => 0,
            _ => 2,
        }
    }

    /// Nagios plugin semantics: OK 0, WARNING 1, CRITICAL 2.
    pub fn nagios_exit_code(&self) -> i32 {
        match self.worst() {
            CheckStatus::Ok => 0,
            CheckStatus::Warning => 1,
            CheckStatus::Critical | CheckStatus::Missing => 2,
        }
    }

    pub fn nagios_line(&self) -> String {
        let label = match self.worst() {
            CheckStatus::Ok => "OK",
            CheckStatus::Warning => "WARNING",
            CheckStatus::Critical | CheckStatus::Missing => "CRITICAL",
        };
        let detail = self
            .entries
            .iter()
            .map(|e| match e.days_remaining {
                Some(days) => format!("{}={}d", e.service, days),
                None => format!("{}=missing", e.service),
            })
            .collect::<Vec<_>>()
            .join(" ");
        format!("CERTS {label} | {detail}")
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}
