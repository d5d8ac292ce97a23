use std::{fmt::Display, future::Future, time::Duration};

use anyhow::bail;
use tracing::debug;

pub mod keypair;
pub mod limiter;

pub async fn repeat_until_ok<
    T,
    E: Display + Sync + Send + 'static,
    F: Future<Output = Result<T, E>>,
    FN: Fn() -> F,
>(
    new_fut: FN,
    max_repeats: u64,
    backoff: Duration,
) -> anyhow::Result<T> {
    let mut repeats = 0;
    while repeats < max_repeats {
        let iter_res = new_fut().await;
        match iter_res {
            Ok(res) => return Ok(res),
            Err(err) => {
                debug!("repeated future completed with err at {repeats}: {err:#}");
                tokio::time::sleep(backoff).await;
            }
        }
        repeats += 1;
    }
    bail!("future iterated {max_repeats} without success")
}
