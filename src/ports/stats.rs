/// StatsHandler defines the port (interface) for connection-count samples.
///
/// The server pushes the current size of its client table after every
/// admission and disconnect. Aggregation and export are the implementor's
/// concern; the engine never reads anything back.
pub trait StatsHandler: Send + Sync + 'static {
    /// Begin accepting samples
    fn start(&self);

    /// Stop accepting samples; later pushes must be tolerated and ignored
    fn stop(&self);

    /// A new connection-count observation
    fn connections(&self, count: usize);
}
