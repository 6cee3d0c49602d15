/*
 * Copyright (c) 2025. The curator-connect authors
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */
use std::sync::Once;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Declare the submodules.
pub mod curator;

/// Polls `condition` every few milliseconds until it holds or `deadline`
/// passes. Returns the final verdict so callers can assert on it.
pub async fn eventually<F>(deadline: std::time::Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let started = tokio::time::Instant::now();
    while started.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    condition()
}

// Ensures tracing initialization happens only once across all tests.
static INIT: Once = Once::new();

/// Initializes the global tracing subscriber for tests.
///
/// Sets up a `tracing_subscriber::FmtSubscriber` with an `EnvFilter`
/// controlling log levels per module during test execution, writing to
/// `logs/connector_tests.txt`. Guarded by `std::sync::Once` so the
/// initialization runs only once however many tests call it.
pub fn initialize_tracing() {
    INIT.call_once(|| {
        // Ensure logs directory exists
        std::fs::create_dir_all("logs").expect("could not create logs dir");

        // Set up file appender (no rotation, file is logs/connector_tests.txt)
        let file_appender =
            RollingFileAppender::new(Rotation::NEVER, "logs", "connector_tests.txt");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leak the guard so the non-blocking writer is not dropped before process exit
        Box::leak(Box::new(guard));

        let filter = EnvFilter::new("trace")
            .add_directive(
                "curator_connect::common::connector=trace"
                    .parse()
                    .unwrap(),
            )
            .add_directive(
                "curator_connect::common::controller=trace"
                    .parse()
                    .unwrap(),
            )
            .add_directive("curator_connect::common::future=trace".parse().unwrap())
            .add_directive("curator_connect::memory=trace".parse().unwrap())
            .add_directive("connector_tests=trace".parse().unwrap())
            .add_directive("controller_tests=trace".parse().unwrap())
            .add_directive("transport_tests=trace".parse().unwrap())
            .add_directive("tokio=info".parse().unwrap())
            .add_directive(tracing_subscriber::filter::LevelFilter::TRACE.into());

        let subscriber = FmtSubscriber::builder()
            .with_span_events(FmtSpan::NONE)
            .with_max_level(Level::TRACE)
            .compact()
            .with_line_number(true)
            .without_time()
            .with_target(true)
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("setting default subscriber failed");
    });
}
