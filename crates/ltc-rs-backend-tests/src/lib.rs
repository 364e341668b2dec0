pub mod conformance;
pub mod recording_backend;

pub use anyhow::Result;
pub use recording_backend::RecordingBackend;

/// Instantiates the backend conformance suite for a constructor returning
/// `Arc<dyn BackendImpl>`.
#[macro_export]
macro_rules! define_backend_tests {
    ($module:ident, $backend_ctor:expr) => {
        #[cfg(test)]
        mod $module {
            #[allow(unused_imports)]
            use super::*;

            use $crate::conformance;

            macro_rules! conformance_test {
                ($name:ident) => {
                    #[test]
                    fn $name() -> $crate::Result<()> {
                        let backend = ($backend_ctor)();
                        conformance::$name(&backend)
                    }
                };
            }

            conformance_test!(data_round_trip);
            conformance_test!(placeholders_take_assigned_values);
            conformance_test!(compile_is_one_to_one);
            conformance_test!(execute_honours_arity);
            conformance_test!(lowering_dedups_parameters);
            conformance_test!(topology_is_consistent);
            conformance_test!(prepare_to_exit_keeps_topology);
            conformance_test!(replication_devices_round_trip);
            conformance_test!(rng_seed_is_deterministic);
            conformance_test!(backend_text_names_computation);
            conformance_test!(executor_materializes_graphs);
        }
    };
}
