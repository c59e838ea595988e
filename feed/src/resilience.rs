use backon::ConstantBuilder;

use std::time::Duration;

/// Reconnect policy for the bar stream: a fixed pause between attempts,
/// no attempt cap. The stream loop rebuilds it after every successful
/// connect and keeps retrying for the life of the process.
pub fn reconnect_policy(delay: Duration) -> ConstantBuilder {
    ConstantBuilder::default()
        .with_delay(delay)
        .without_max_times()
}
