mod common;

use common::{now, sample_cluster, seed_cert_pair, seed_dhparams, seed_ingress_service, MockCrypto};
use ndi::prelude::*;
use std::sync::Arc;

const DAY: i64 = 24 * 60 * 60;

fn controller(orchestrator: &Arc<MemoryOrchestrator>) -> Controller {
    Controller::new(
        orchestrator.clone(),
        Arc::new(MockCrypto),
        Arc::new(NginxRenderer::new()),
        Namespace::default(),
        sample_cluster(),
    )
}

fn count_ops(orchestrator: &MemoryOrchestrator, op_prefix: &str) -> usize {
    let journal = orchestrator.journal();
    let journal = journal.lock().unwrap();
    journal.iter().filter(|op| op.starts_with(op_prefix)).count()
}

#[tokio::test]
async fn dhparams_created_when_absent() {
    let orchestrator = Arc::new(MemoryOrchestrator::new());
    controller(&orchestrator).ensure_dhparams().await.unwrap();

    let entry = orchestrator.get_secret("ndi.dhparam.0").await.unwrap().unwrap();
    assert!(String::from_utf8(entry.data).unwrap().contains("DH PARAMETERS"));

    let expires: i64 = entry.labels["expires"].parse().unwrap();
    let expected = now() + 28 * DAY;
    assert!((expires - expected).abs() < 10);
}

#[tokio::test]
async fn dhparams_rotated_when_expiring() {
    let orchestrator = Arc::new(MemoryOrchestrator::new());
    seed_dhparams(&orchestrator, 2, now() + 6 * DAY).await;

    controller(&orchestrator).ensure_dhparams().await.unwrap();

    let entry = orchestrator.get_secret("ndi.dhparam.3").await.unwrap().unwrap();
    let expires: i64 = entry.labels["expires"].parse().unwrap();
    assert!((expires - (now() + 28 * DAY)).abs() < 10);

    // The old version is left in place.
    assert!(orchestrator.get_secret("ndi.dhparam.2").await.unwrap().is_some());
}

#[tokio::test]
async fn dhparams_left_alone_when_fresh() {
    let orchestrator = Arc::new(MemoryOrchestrator::new());
    seed_dhparams(&orchestrator, 2, now() + 10 * DAY).await;

    controller(&orchestrator).ensure_dhparams().await.unwrap();

    let secrets = orchestrator.list_secrets(Some("ndi.dhparam.")).await.unwrap();
    assert_eq!(secrets.len(), 1);
    assert!(orchestrator.get_secret("ndi.dhparam.3").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn nginx_config_hash_is_stable_and_second_pass_writes_nothing() {
    let orchestrator = Arc::new(MemoryOrchestrator::new());
    seed_dhparams(&orchestrator, 0, now() + 20 * DAY).await;
    seed_ingress_service(&orchestrator, "app", "app.example.com", false).await;

    let controller = controller(&orchestrator);

    controller.ensure_nginx_service().await.unwrap();
    let conf_names: Vec<String> = orchestrator
        .list_secrets(Some("ndi.conf."))
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    assert_eq!(conf_names.len(), 1);
    let writes_after_first = count_ops(&orchestrator, "create_secret ndi.conf.");

    controller.ensure_nginx_service().await.unwrap();
    let conf_after: Vec<String> = orchestrator
        .list_secrets(Some("ndi.conf."))
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    let writes_after_second = count_ops(&orchestrator, "create_secret ndi.conf.");

    // Same content-addressed name, and no secret write on the second pass.
    assert_eq!(conf_names, conf_after);
    assert_eq!(writes_after_first, 1);
    assert_eq!(writes_after_second, 1);
}

#[tokio::test(start_paused = true)]
async fn nginx_service_mounts_config_dhparams_and_cert_pairs() {
    let orchestrator = Arc::new(MemoryOrchestrator::new());
    seed_dhparams(&orchestrator, 1, now() + 20 * DAY).await;
    let id = seed_ingress_service(&orchestrator, "app", "app.example.com", true).await;
    seed_cert_pair(&orchestrator, &id, 4, now() + 60 * DAY).await;

    controller(&orchestrator).ensure_nginx_service().await.unwrap();

    let nginx = orchestrator.get_service("ndi-nginx").await.unwrap().unwrap();
    let targets: Vec<(&str, &str)> = nginx
        .secrets
        .iter()
        .map(|secret| (secret.secret_name.as_str(), secret.target.as_str()))
        .collect();

    assert!(targets
        .iter()
        .any(|(name, target)| name.starts_with("ndi.conf.") && *target == "/etc/nginx/nginx.conf"));
    assert!(targets
        .iter()
        .any(|(name, target)| *name == "ndi.dhparam.1"
            && *target == "/etc/nginx/ssl-dhparams.pem"));

    let key_name = format!("ndi.svc.{}.key.4", id);
    let crt_name = format!("ndi.svc.{}.crt.4", id);
    assert!(targets.contains(&(key_name.as_str(), key_name.as_str())));
    assert!(targets.contains(&(crt_name.as_str(), crt_name.as_str())));

    for secret in &nginx.secrets {
        assert_eq!(secret.mode, 0o440);
    }
}

#[tokio::test(start_paused = true)]
async fn nginx_service_fails_pass_without_dhparams() {
    let orchestrator = Arc::new(MemoryOrchestrator::new());
    seed_ingress_service(&orchestrator, "app", "app.example.com", false).await;

    let error = controller(&orchestrator)
        .ensure_nginx_service()
        .await
        .unwrap_err();
    assert!(matches!(error, IngressError::Invariant(_)));
}

#[tokio::test(start_paused = true)]
async fn malformed_service_is_skipped_not_fatal() {
    let orchestrator = Arc::new(MemoryOrchestrator::new());
    seed_dhparams(&orchestrator, 0, now() + 20 * DAY).await;
    seed_ingress_service(&orchestrator, "good", "good.example.com", false).await;

    let mut labels = std::collections::HashMap::new();
    labels.insert("nginx-ingress.host".to_string(), "bad.example.com".to_string());
    labels.insert("nginx-ingress.port".to_string(), "not-a-port".to_string());
    orchestrator.register_service("bad", labels).await;

    controller(&orchestrator).ensure_nginx_service().await.unwrap();

    let conf = orchestrator.list_secrets(Some("ndi.conf.")).await.unwrap();
    let text = String::from_utf8(conf[0].data.clone()).unwrap();
    assert!(text.contains("good.example.com"));
    assert!(!text.contains("bad.example.com"));
}

#[tokio::test(start_paused = true)]
async fn account_bootstrap_runs_and_removes_workload() {
    let orchestrator = Arc::new(MemoryOrchestrator::new());
    orchestrator
        .set_converged_state("ndi-account", TaskState::Complete)
        .await;

    controller(&orchestrator).ensure_account().await.unwrap();

    // The one-shot workload ran and was removed.
    assert!(orchestrator.get_service("ndi-account").await.unwrap().is_none());
    assert_eq!(count_ops(&orchestrator, "ensure_service ndi-account"), 1);
    assert_eq!(count_ops(&orchestrator, "remove_service ndi-account"), 1);
}

#[tokio::test(start_paused = true)]
async fn account_bootstrap_skipped_when_secret_exists() {
    let orchestrator = Arc::new(MemoryOrchestrator::new());
    orchestrator
        .create_secret("ndi.acct", b"blob", Default::default())
        .await
        .unwrap();

    controller(&orchestrator).ensure_account().await.unwrap();
    assert_eq!(count_ops(&orchestrator, "ensure_service ndi-account"), 0);
}

#[tokio::test(start_paused = true)]
async fn account_bootstrap_failure_is_reported_and_workload_removed() {
    let orchestrator = Arc::new(MemoryOrchestrator::new());
    orchestrator
        .set_converged_state("ndi-account", TaskState::Failed)
        .await;

    let error = controller(&orchestrator).ensure_account().await.unwrap_err();
    assert!(matches!(error, IngressError::Acme(_)));
    assert!(orchestrator.get_service("ndi-account").await.unwrap().is_none());
}

#[tokio::test]
async fn robot_recreated_with_account_secret_mounted() {
    let orchestrator = Arc::new(MemoryOrchestrator::new());
    orchestrator
        .create_secret("ndi.acct", b"blob", Default::default())
        .await
        .unwrap();
    // Leftover worker from a previous controller run.
    orchestrator
        .register_service("ndi-robot", Default::default())
        .await;

    controller(&orchestrator).ensure_robot().await.unwrap();

    assert_eq!(count_ops(&orchestrator, "remove_service ndi-robot"), 1);
    let robot = orchestrator.get_service("ndi-robot").await.unwrap().unwrap();
    assert_eq!(robot.secrets.len(), 1);
    assert_eq!(robot.secrets[0].secret_name, "ndi.acct");
    assert_eq!(robot.secrets[0].target, "ndi.acct");
}

#[tokio::test]
async fn robot_requires_account_secret() {
    let orchestrator = Arc::new(MemoryOrchestrator::new());
    let error = controller(&orchestrator).ensure_robot().await.unwrap_err();
    assert!(matches!(error, IngressError::NotFound(_)));
}

#[tokio::test]
async fn challenge_responder_recreated() {
    let orchestrator = Arc::new(MemoryOrchestrator::new());
    controller(&orchestrator).ensure_challenge().await.unwrap();

    assert!(orchestrator.get_service("ndi-challenge").await.unwrap().is_some());
    assert_eq!(count_ops(&orchestrator, "ensure_service ndi-challenge"), 1);
}
