//! Application wiring: credentials, session, outputs, watcher loop

use anyhow::{Context, Result};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::actions::{LightsAction, Reaction};
use crate::config::{AppConfig, Credentials, FeedMode, MatchBehavior, OutputConfig};
use crate::error::DriverError;
use crate::feed::{Cursor, FeedClient, FeedWatcher};
use crate::output::{ChannelGroup, OutputController, OutputSink};

/// Run until `shutdown` resolves or a fatal error occurs
///
/// Credentials are checked and the provider session is opened before
/// `make_sink` is called, so an authentication failure never touches the
/// outputs. Once the controller exists, outputs are always released on the
/// way out.
pub async fn run<F>(
    config: &AppConfig,
    credentials_path: &Path,
    since: Cursor,
    make_sink: F,
    shutdown: impl Future<Output = ()>,
) -> Result<()>
where
    F: FnOnce(&OutputConfig) -> Result<Arc<dyn OutputSink>, DriverError>,
{
    let mode = config.feed.mode;
    let credentials = Credentials::load(credentials_path, mode)
        .await
        .with_context(|| {
            format!(
                "Failed to load credentials from {}",
                credentials_path.display()
            )
        })?;

    let client = FeedClient::from_config(&config.feed).context("Failed to build HTTP client")?;
    let session = client
        .connect(&credentials)
        .await
        .context("Authentication with feed provider failed")?;

    if mode == FeedMode::Stream {
        if config.feed.replace_rules {
            client
                .replace_rules(&session, &config.feed.rules)
                .await
                .context("Failed to install stream rules")?;
        } else {
            info!("Keeping existing stream rules");
        }
    }

    let sink = make_sink(&config.output).context("Failed to open output sink")?;
    let groups: Vec<ChannelGroup> = config.output.groups.iter().map(ChannelGroup::from).collect();
    let controller = match OutputController::new(groups, sink.clone(), config.output.auto_off()) {
        Ok(controller) => controller,
        Err(e) => {
            if let Err(teardown_err) = sink.teardown() {
                warn!("Sink teardown after failed setup: {}", teardown_err);
            }
            return Err(e).context("Failed to configure outputs");
        }
    };

    let watcher = FeedWatcher::new(client, session, &config.feed).with_cursor(since);
    let result = serve(config, &controller, watcher, shutdown).await;

    match (controller.shutdown(), result) {
        (Ok(()), result) => result,
        (Err(e), Ok(())) => Err(e).context("Failed to release outputs"),
        (Err(e), Err(fatal)) => {
            error!("Failed to release outputs: {}", e);
            Err(fatal)
        }
    }
}

async fn serve(
    config: &AppConfig,
    controller: &OutputController,
    mut watcher: FeedWatcher,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    tokio::pin!(shutdown);

    tokio::select! {
        started = startup(&config.output, controller) => {
            started.context("Startup sequence failed")?
        }
        _ = &mut shutdown => {
            info!("Shutdown requested during startup");
            return Ok(());
        }
    }

    let action = LightsAction::new(controller.clone(), Reaction::from_config(&config.output));
    info!(
        "👀 Watching {} ({:?} mode), groups [{}], on match {:?}",
        config.feed.query_hashtag(),
        config.feed.mode,
        controller.group_names().collect::<Vec<_>>().join(", "),
        action.reaction()
    );

    match config.feed.mode {
        FeedMode::Poll => watcher.run_polling(&action, shutdown).await,
        FeedMode::Stream => watcher.run_streaming(&action, shutdown).await,
    }
    Ok(())
}

/// Liveness flash, then the scene baseline (primary ON)
async fn startup(output: &OutputConfig, controller: &OutputController) -> Result<(), DriverError> {
    let scene = output.scene.as_ref();

    if output.startup_flash.enabled {
        let alternate = scene.map(|s| (s.primary.as_str(), s.secondary.as_str()));
        controller
            .flash(output.startup_flash.count, output.startup_flash.step(), alternate)
            .await?;
    }

    if output.on_match == MatchBehavior::Scene {
        if let Some(scene) = scene {
            controller.turn_on(&scene.primary, false)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crate::output::testing::{RecordingSink, SinkCall};
    use crate::output::Level;
    use mockito::Matcher;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const FULL_KEYS: &str = r#"{
        "CONSUMER_KEY": "ck",
        "CONSUMER_SECRET": "cs",
        "ACCESS_TOKEN_KEY": "tk",
        "ACCESS_TOKEN_SECRET": "ts"
    }"#;

    fn keys_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn config(api_base: &str, extra_output: &str) -> AppConfig {
        let yaml = format!(
            r#"
feed:
  hashtag: avianaart
  api_base: "{api_base}"
  poll_interval_ms: 20
output:
  groups:
    - {{ name: white, pins: [11] }}
  auto_off_ms: 100
  startup_flash: {{ enabled: false }}
{extra_output}
"#
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn recording(sink: &Arc<RecordingSink>) -> impl FnOnce(&OutputConfig) -> Result<Arc<dyn OutputSink>, DriverError> {
        let sink = sink.clone();
        move |_| Ok(sink as Arc<dyn OutputSink>)
    }

    #[tokio::test]
    async fn test_missing_keys_fail_before_touching_outputs() {
        let keys = keys_file(r#"{"CONSUMER_KEY": "ck", "CONSUMER_SECRET": "cs"}"#);
        let sink = RecordingSink::new();

        let err = run(
            &config("http://127.0.0.1:9", ""),
            keys.path(),
            Cursor::new(),
            recording(&sink),
            std::future::pending(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<AuthError>(),
            Some(AuthError::MissingKeys(_))
        ));
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_token_never_touches_outputs() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth2/token")
            .with_status(403)
            .create_async()
            .await;

        let keys = keys_file(FULL_KEYS);
        let sink = RecordingSink::new();
        let err = run(
            &config(&server.url(), ""),
            keys.path(),
            Cursor::new(),
            recording(&sink),
            std::future::pending(),
        )
        .await
        .unwrap_err();

        assert!(err.downcast_ref::<AuthError>().is_some());
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_poll_match_turns_lights_on_once_then_auto_off() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth2/token")
            .with_status(200)
            .with_body(r#"{"token_type": "bearer", "access_token": "AAAA"}"#)
            .create_async()
            .await;
        let first = server
            .mock("GET", "/1.1/search/tweets.json")
            .match_query(Matcher::UrlEncoded("since_id".into(), "1000".into()))
            .with_status(200)
            .with_body(r#"{"statuses": [{"id_str": "1001", "user": {"name": "A"}}]}"#)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("GET", "/1.1/search/tweets.json")
            .match_query(Matcher::UrlEncoded("since_id".into(), "1001".into()))
            .with_status(200)
            .with_body(r#"{"statuses": []}"#)
            .create_async()
            .await;

        let keys = keys_file(FULL_KEYS);
        let sink = RecordingSink::new();
        run(
            &config(&server.url(), ""),
            keys.path(),
            Cursor::starting_at("1000"),
            recording(&sink),
            tokio::time::sleep(Duration::from_millis(500)),
        )
        .await
        .unwrap();

        first.assert_async().await;
        assert_eq!(
            sink.calls(),
            vec![
                SinkCall::Configure(11),
                SinkCall::Write(11, Level::Inactive),
                // match
                SinkCall::Write(11, Level::Active),
                // auto-off
                SinkCall::Write(11, Level::Inactive),
                // shutdown
                SinkCall::Write(11, Level::Inactive),
                SinkCall::Teardown,
            ]
        );
    }

    #[tokio::test]
    async fn test_scene_baseline_and_stream_rules() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth2/token")
            .with_status(200)
            .with_body(r#"{"token_type": "bearer", "access_token": "AAAA"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/labs/1/tweets/stream/filter/rules")
            .with_status(200)
            .with_body(r#"{"meta": {"sent": "now"}}"#)
            .create_async()
            .await;
        let add = server
            .mock("POST", "/labs/1/tweets/stream/filter/rules")
            .match_body(Matcher::Regex(r#""add""#.to_string()))
            .with_status(201)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;
        server
            .mock("GET", "/labs/1/tweets/stream/filter")
            .with_status(503)
            .create_async()
            .await;

        let mut config = config(
            &server.url(),
            "  on_match: scene\n  scene: { primary: white, secondary: brown }\n",
        );
        config.feed.mode = FeedMode::Stream;
        config.feed.rules = vec![crate::config::RuleConfig {
            value: "#avianaart".to_string(),
            tag: "avianaart".to_string(),
        }];
        config.output.groups.push(crate::config::GroupConfig {
            name: "brown".to_string(),
            pins: vec![13],
        });

        let keys = keys_file(FULL_KEYS);
        let sink = RecordingSink::new();
        run(
            &config,
            keys.path(),
            Cursor::new(),
            recording(&sink),
            tokio::time::sleep(Duration::from_millis(200)),
        )
        .await
        .unwrap();

        add.assert_async().await;
        let writes = sink.writes();
        assert!(writes.contains(&(11, Level::Active)));
        assert!(!writes.contains(&(13, Level::Active)));
        assert_eq!(sink.calls().last(), Some(&SinkCall::Teardown));
    }

    #[tokio::test]
    async fn test_sink_failure_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth2/token")
            .with_status(200)
            .with_body(r#"{"token_type": "bearer", "access_token": "AAAA"}"#)
            .create_async()
            .await;

        let keys = keys_file(FULL_KEYS);
        let err = run(
            &config(&server.url(), ""),
            keys.path(),
            Cursor::new(),
            |_: &OutputConfig| -> Result<Arc<dyn OutputSink>, DriverError> {
                Err(DriverError::Unavailable("no gpio here".to_string()))
            },
            std::future::pending(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<DriverError>(),
            Some(DriverError::Unavailable(_))
        ));
    }
}
