use exposer::{
    route::{route_resource, ROUTE_GROUP},
    BaseConfig,
};
use k8s_openapi::api::{core::v1::Service, networking::v1::Ingress};
use kube::{
    api::{DynamicObject, ListParams},
    Api, Client,
};
use serde::Serialize;
use std::path::Path;

const CHECK: &str = "√";
const EX: &str = "×";
const CATEGORY: &str = "exposer";

#[derive(Serialize)]
struct CheckOutput {
    success: bool,
    categories: Vec<Category>,
}

#[derive(Serialize)]
struct Category {
    category_name: &'static str,
    checks: Vec<CheckResult>,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    #[default]
    Success,
    Error,
}

#[derive(Serialize, Default)]
pub struct CheckResult {
    description: &'static str,
    result: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CheckResult {
    fn ok(description: &'static str) -> Self {
        Self {
            description,
            result: CheckStatus::Success,
            ..Default::default()
        }
    }

    fn failed(description: &'static str, error: impl ToString, hint: &'static str) -> Self {
        Self {
            description,
            result: CheckStatus::Error,
            error: Some(error.to_string()),
            hint: Some(hint),
        }
    }

    pub fn success(&self) -> bool {
        matches!(self.result, CheckStatus::Success)
    }
}

pub fn config_check(path: &Path) -> CheckResult {
    let description = "configuration is valid";
    match BaseConfig::load(path) {
        Ok(_) => CheckResult::ok(description),
        Err(error) => CheckResult::failed(
            description,
            error,
            "pass --config or set CONFIG_FILE_PATH to the controller's configuration file",
        ),
    }
}

pub async fn services_check(client: Client) -> CheckResult {
    let api = Api::<Service>::all(client);
    let description = "can list services";
    match api.list(&ListParams::default().limit(1)).await {
        Ok(_) => CheckResult::ok(description),
        Err(error) => CheckResult::failed(
            description,
            error,
            "the controller needs list and watch access to services",
        ),
    }
}

/// Checks that the API the controller would pick in `auto` mode is served.
pub async fn exposure_check(client: Client) -> CheckResult {
    let description = "exposure API is reachable";
    let groups = match client.list_api_groups().await {
        Ok(groups) => groups,
        Err(error) => {
            return CheckResult::failed(description, error, "the cluster must be reachable")
        }
    };

    let params = ListParams::default().limit(1);
    let res = if groups.groups.iter().any(|g| g.name == ROUTE_GROUP) {
        Api::<DynamicObject>::all_with(client, &route_resource())
            .list(&params)
            .await
            .map(|_| ())
    } else {
        Api::<Ingress>::all(client).list(&params).await.map(|_| ())
    };
    match res {
        Ok(()) => CheckResult::ok(description),
        Err(error) => CheckResult::failed(
            description,
            error,
            "the controller needs access to ingresses or routes",
        ),
    }
}

pub async fn run_checks(client: Client, config: &Path) -> Vec<CheckResult> {
    vec![
        config_check(config),
        services_check(client.clone()).await,
        exposure_check(client).await,
    ]
}

pub fn print_checks(results: Vec<CheckResult>) -> bool {
    let mut success = true;
    println!("{}", CATEGORY);
    println!("{}", CATEGORY.chars().map(|_| '-').collect::<String>());
    for result in results {
        match result.result {
            CheckStatus::Success => {
                println!("{} {}", CHECK, result.description);
            }
            CheckStatus::Error => {
                success = false;
                println!("{} {}", EX, result.description);
                if let Some(error) = result.error {
                    println!("    {}", error);
                }
                if let Some(hint) = result.hint {
                    println!("    hint: {}", hint);
                }
            }
        }
    }

    println!();
    let success_symbol = if success { CHECK } else { EX };
    println!("Status check results are {}", success_symbol);
    success
}

pub fn json_print_checks(results: Vec<CheckResult>) -> anyhow::Result<bool> {
    let success = results.iter().all(CheckResult::success);
    let output = CheckOutput {
        success,
        categories: vec![Category {
            category_name: CATEGORY,
            checks: results,
        }],
    };
    serde_json::to_writer_pretty(std::io::stdout(), &output)?;
    println!();
    Ok(success)
}
