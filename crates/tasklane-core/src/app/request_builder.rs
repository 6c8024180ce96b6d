//! DeploymentRequestBuilder - 起動リクエストの組み立て
//!
//! # マージ順（後勝ち）
//! 1. common application properties（設定ファイル）
//! 2. タスク定義の static properties
//! 3. 呼び出し側の deployment properties
//! 4. 呼び出し側の command line args のうち `--key=value` 形式のもの
//!    （app properties を上書きし、引数としてもそのまま残す）
//!
//! # キーの振り分け
//! - `deployer.<key>` / `deployer.<task>.<key>` → deployment properties
//! - `app.<key>` / `app.<task>.<key>` → app properties
//! - それ以外 → app properties にそのまま
//!
//! command line args はすべて順序を保ってそのまま渡します。

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::launch::{COMPOSED_GRAPH_PROPERTY, SERVER_URI_PROPERTY};
use crate::domain::{CallerContext, LaunchRequest, OrchestrationError, TaskDefinition};
use crate::ports::AppResolver;

const DEPLOYER_PREFIX: &str = "deployer.";
const APP_PREFIX: &str = "app.";

/// Composed task graphs are sent as step names joined by this separator.
pub const GRAPH_SEPARATOR: &str = " && ";

pub struct DeploymentRequestBuilder {
    resolver: Arc<dyn AppResolver>,
    common_properties: BTreeMap<String, String>,
    server_uri: Option<String>,
}

impl DeploymentRequestBuilder {
    pub fn new(resolver: Arc<dyn AppResolver>) -> Self {
        Self {
            resolver,
            common_properties: BTreeMap::new(),
            server_uri: None,
        }
    }

    pub fn with_common_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.common_properties = properties;
        self
    }

    /// Endpoint the launched task uses to report back.
    pub fn with_server_uri(mut self, uri: impl Into<String>) -> Self {
        self.server_uri = Some(uri.into());
        self
    }

    pub async fn build(
        &self,
        definition: &TaskDefinition,
        deployment_properties: &BTreeMap<String, String>,
        command_line_args: &[String],
        caller: &CallerContext,
    ) -> Result<LaunchRequest, OrchestrationError> {
        let task = definition.name.as_str();
        let mut merged = MergedProperties::default();

        for (key, value) in &self.common_properties {
            merged.apply(task, key, value)?;
        }
        for (key, value) in &definition.properties {
            merged.apply(task, key, value)?;
        }
        for (key, value) in deployment_properties {
            merged.apply(task, key, value)?;
        }

        for arg in command_line_args {
            if let Some((key, value)) = split_property_arg(arg)? {
                merged.apply(task, key, value)?;
            }
        }

        if let Some(uri) = &self.server_uri {
            merged
                .app
                .entry(SERVER_URI_PROPERTY.to_string())
                .or_insert_with(|| uri.clone());
        }
        if let Some(steps) = &definition.composed_steps {
            merged
                .app
                .insert(COMPOSED_GRAPH_PROPERTY.to_string(), steps.join(GRAPH_SEPARATOR));
        }

        let resource = self
            .resolver
            .resolve_resource(&definition.app_reference)
            .await
            .map_err(|e| OrchestrationError::PropertyResolutionError {
                reference: definition.app_reference.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(
            task = %task,
            actor = %caller.actor,
            resource = %resource.uri,
            app_properties = merged.app.len(),
            deployment_properties = merged.deployment.len(),
            "launch request built"
        );

        Ok(LaunchRequest {
            task_name: definition.name.clone(),
            resource,
            app_properties: merged.app,
            deployment_properties: merged.deployment,
            command_line_args: command_line_args.to_vec(),
            execution_id: None,
        })
    }
}

#[derive(Default)]
struct MergedProperties {
    app: BTreeMap<String, String>,
    deployment: BTreeMap<String, String>,
}

impl MergedProperties {
    fn apply(&mut self, task: &str, key: &str, value: &str) -> Result<(), OrchestrationError> {
        if key.is_empty() {
            return Err(OrchestrationError::InvalidPropertyFormat(format!(
                "empty key for value '{value}'"
            )));
        }

        let (target, stripped) = if let Some(rest) = key.strip_prefix(DEPLOYER_PREFIX) {
            (&mut self.deployment, strip_task_scope(task, rest))
        } else if let Some(rest) = key.strip_prefix(APP_PREFIX) {
            (&mut self.app, strip_task_scope(task, rest))
        } else {
            (&mut self.app, key)
        };

        if stripped.is_empty() {
            return Err(OrchestrationError::InvalidPropertyFormat(format!(
                "'{key}' has a prefix but no property name"
            )));
        }
        target.insert(stripped.to_string(), value.to_string());
        Ok(())
    }
}

/// `deployer.etl.memory` for task `etl` -> `memory`. A bare `etl.` is kept
/// so the caller reports it as malformed.
fn strip_task_scope<'a>(task: &str, rest: &'a str) -> &'a str {
    rest.strip_prefix(task)
        .and_then(|r| r.strip_prefix('.'))
        .unwrap_or(rest)
}

/// `--key=value` -> `Some((key, value))`; anything else is a plain argument.
fn split_property_arg(arg: &str) -> Result<Option<(&str, &str)>, OrchestrationError> {
    let Some(body) = arg.strip_prefix("--") else {
        return Ok(None);
    };
    match body.split_once('=') {
        Some(("", _)) => Err(OrchestrationError::InvalidPropertyFormat(format!(
            "argument '{arg}' has no key"
        ))),
        Some((key, value)) => Ok(Some((key, value))),
        None => Ok(None),
    }
}

/// Parses `"a=1,b=2"` style property lists.
///
/// A segment without `=` continues the previous value, so `"a=x,y,b=2"`
/// yields `a = "x,y"`.
pub fn parse_properties(input: &str) -> Result<BTreeMap<String, String>, OrchestrationError> {
    let mut properties = BTreeMap::new();
    let mut last_key: Option<String> = None;

    for segment in input.split(',') {
        if segment.trim().is_empty() {
            continue;
        }
        match segment.split_once('=') {
            Some((key, value)) => {
                let key = key.trim();
                if key.is_empty() {
                    return Err(OrchestrationError::InvalidPropertyFormat(format!(
                        "'{segment}' has no key"
                    )));
                }
                properties.insert(key.to_string(), value.trim().to_string());
                last_key = Some(key.to_string());
            }
            None => {
                let key = last_key.as_ref().ok_or_else(|| {
                    OrchestrationError::InvalidPropertyFormat(format!(
                        "'{segment}' is not a key=value pair"
                    ))
                })?;
                if let Some(value) = properties.get_mut(key) {
                    value.push(',');
                    value.push_str(segment.trim());
                }
            }
        }
    }
    Ok(properties)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AppResource;
    use crate::impls::InMemoryAppRegistry;
    use rstest::rstest;

    async fn builder() -> DeploymentRequestBuilder {
        let registry = InMemoryAppRegistry::new();
        registry.register("etl-app", AppResource::new("file:/opt/etl")).await;
        DeploymentRequestBuilder::new(Arc::new(registry))
    }

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn later_sources_override_earlier_ones() {
        let builder = builder()
            .await
            .with_common_properties(props(&[("app.level", "common"), ("region", "eu")]));
        let definition = TaskDefinition::new("etl", "etl-app")
            .with_property("app.level", "definition")
            .with_property("app.batch", "10");

        let request = builder
            .build(
                &definition,
                &props(&[("app.batch", "20"), ("deployer.memory", "1g")]),
                &["--batch=30".to_string(), "positional".to_string()],
                &CallerContext::system(),
            )
            .await
            .unwrap();

        assert_eq!(request.app_properties, props(&[
            ("batch", "30"),
            ("level", "definition"),
            ("region", "eu"),
        ]));
        assert_eq!(request.deployment_properties, props(&[("memory", "1g")]));
        assert_eq!(
            request.command_line_args,
            vec!["--batch=30".to_string(), "positional".to_string()]
        );
        assert_eq!(request.resource.uri, "file:/opt/etl");
        assert!(request.execution_id.is_none());
    }

    #[tokio::test]
    async fn task_scoped_keys_lose_their_scope() {
        let builder = builder().await;
        let definition = TaskDefinition::new("etl", "etl-app");
        let request = builder
            .build(
                &definition,
                &props(&[("deployer.etl.cpu", "2"), ("app.etl.mode", "full"), ("app.other.x", "1")]),
                &[],
                &CallerContext::system(),
            )
            .await
            .unwrap();
        assert_eq!(request.deployment_properties, props(&[("cpu", "2")]));
        assert_eq!(request.app_properties, props(&[("mode", "full"), ("other.x", "1")]));
    }

    #[tokio::test]
    async fn server_uri_and_graph_are_injected() {
        let builder = builder().await.with_server_uri("http://localhost:9393");
        let definition = TaskDefinition::new("nightly", "etl-app")
            .composed_of(vec!["extract".into(), "load".into()]);
        let request = builder
            .build(&definition, &BTreeMap::new(), &[], &CallerContext::system())
            .await
            .unwrap();
        assert_eq!(
            request.app_properties.get(SERVER_URI_PROPERTY).map(String::as_str),
            Some("http://localhost:9393")
        );
        assert_eq!(
            request.app_properties.get(COMPOSED_GRAPH_PROPERTY).map(String::as_str),
            Some("extract && load")
        );
    }

    #[tokio::test]
    async fn unresolvable_app_is_a_resolution_error() {
        let builder = builder().await;
        let definition = TaskDefinition::new("etl", "missing-app");
        let err = builder
            .build(&definition, &BTreeMap::new(), &[], &CallerContext::system())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::PropertyResolutionError { reference, .. } if reference == "missing-app"
        ));
    }

    #[rstest]
    #[case::bare_deployer_prefix("deployer.")]
    #[case::bare_app_prefix("app.")]
    #[case::bare_task_scope("app.etl.")]
    #[case::empty_key("")]
    #[tokio::test]
    async fn malformed_keys_are_rejected(#[case] key: &str) {
        let builder = builder().await;
        let definition = TaskDefinition::new("etl", "etl-app");
        let err = builder
            .build(&definition, &props(&[(key, "x")]), &[], &CallerContext::system())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidPropertyFormat(_)));
    }

    #[tokio::test]
    async fn keyless_argument_is_rejected() {
        let builder = builder().await;
        let definition = TaskDefinition::new("etl", "etl-app");
        let err = builder
            .build(&definition, &BTreeMap::new(), &["--=oops".into()], &CallerContext::system())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidPropertyFormat(_)));
    }

    #[test]
    fn parses_property_lists() {
        assert_eq!(
            parse_properties("app.a=1, deployer.b=2").unwrap(),
            props(&[("app.a", "1"), ("deployer.b", "2")])
        );
        assert_eq!(
            parse_properties("app.list=x,y,app.n=1").unwrap(),
            props(&[("app.list", "x,y"), ("app.n", "1")])
        );
        assert!(parse_properties("").unwrap().is_empty());
    }

    #[rstest]
    #[case("novalue")]
    #[case("=1")]
    fn rejects_malformed_property_lists(#[case] input: &str) {
        assert!(matches!(
            parse_properties(input),
            Err(OrchestrationError::InvalidPropertyFormat(_))
        ));
    }
}
