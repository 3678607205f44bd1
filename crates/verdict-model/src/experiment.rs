use crate::record::InstanceRecord;

/// Read-only view of a collected experiment.
///
/// The collector that parses solver logs lives outside this workspace; the
/// engine only needs the joined per-instance table and the set of raw column
/// names available on it. Implementations must return rows in a stable order
/// — row order is part of the engine's determinism contract.
pub trait Experiment {
    /// The joined testrun table, one record per (problem, setting) pair.
    fn data_table(&self) -> &[InstanceRecord];

    /// Names of the raw columns available on the records, in a stable order.
    fn data_keys(&self) -> Vec<String>;
}
