use async_trait::async_trait;

use crate::error::MonitorResult;
use crate::types::{CorrelationGroup, MonitoringEvent};

/// Best-effort push of correlation metadata back to an external monitoring
/// system. Failures are logged by the caller and never abort a pass.
#[async_trait]
pub trait CorrelationEcho: Send + Sync {
    fn name(&self) -> &'static str;

    /// `trace_id` is the group's best trace id, if any member carries one.
    async fn echo(
        &self,
        group: &CorrelationGroup,
        trace_id: Option<&str>,
        members: &[MonitoringEvent],
    ) -> MonitorResult<()>;
}
