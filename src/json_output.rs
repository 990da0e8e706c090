use serde_json::json;

use crate::result::StatusReport;

/// JSON output formatter for CLI commands
pub struct JsonOutput;

impl JsonOutput {
    /// Format a status report in the harness contract
    pub fn report(report: &StatusReport) -> serde_json::Result<String> {
        serde_json::to_string_pretty(report)
    }

    /// Format error as JSON
    pub fn error(message: &str, code: i32) -> String {
        json!({
            "error": {
                "message": message,
                "code": code
            },
            "timestamp": chrono::Utc::now().to_rfc3339()
        })
        .to_string()
    }

    /// Format a fatal error that carries the record that caused it
    pub fn error_with_record(message: &str, code: i32, record: serde_json::Value) -> String {
        json!({
            "error": {
                "message": message,
                "code": code,
                "record": record
            },
            "timestamp": chrono::Utc::now().to_rfc3339()
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogTimezone;

    #[test]
    fn test_error_envelope() {
        let value: serde_json::Value = serde_json::from_str(&JsonOutput::error("boom", 2)).unwrap();
        assert_eq!(value["error"]["message"], "boom");
        assert_eq!(value["error"]["code"], 2);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_report_is_contract_shaped() {
        let report = StatusReport::from_results(Vec::new(), LogTimezone::Utc);
        let value: serde_json::Value = serde_json::from_str(&JsonOutput::report(&report).unwrap()).unwrap();
        assert_eq!(value["Passed"], true);
        assert!(value["Logs"].as_object().unwrap().is_empty());
    }
}
