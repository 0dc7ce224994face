//! Exit codes of the CLI.

use roi_graph_core::TrackingError;

/// Process exit codes.
///
/// - 0: success
/// - 1: the pipeline failed (no valid clustering, empty output)
/// - 2: the configuration or the input data is invalid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CliExitCode {
    Success = 0,
    Failure = 1,
    InvalidInput = 2,
}

/// Map an error chain to its exit code.
pub fn exit_code_for_error(err: &anyhow::Error) -> CliExitCode {
    match err.downcast_ref::<TrackingError>() {
        Some(e) if is_input_error(e) => CliExitCode::InvalidInput,
        Some(_) => CliExitCode::Failure,
        None => CliExitCode::Failure,
    }
}

fn is_input_error(err: &TrackingError) -> bool {
    err.is_user_error() || matches!(err, TrackingError::Io { .. } | TrackingError::Serialization(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(CliExitCode::Success as i32, 0, "Success must be 0");
        assert_eq!(CliExitCode::Failure as i32, 1, "Failure must be 1");
        assert_eq!(CliExitCode::InvalidInput as i32, 2, "Invalid input must be 2");
    }

    #[test]
    fn test_config_error_maps_to_invalid_input() {
        let err = anyhow::Error::new(TrackingError::config("unrecognized option 'general.foo'"))
            .context("loading configuration");
        assert_eq!(exit_code_for_error(&err), CliExitCode::InvalidInput);
    }

    #[test]
    fn test_clustering_failure_maps_to_failure() {
        let err = anyhow::Error::new(TrackingError::ClusteringFailed {
            message: "no valid labeling".into(),
            trials: Vec::new(),
        });
        assert_eq!(exit_code_for_error(&err), CliExitCode::Failure);

        let other = anyhow::anyhow!("unexpected");
        assert_eq!(exit_code_for_error(&other), CliExitCode::Failure);
    }
}
