//! Task executor tests against in-memory runtime and central API doubles

use super::*;
use crate::models::{ContainerSpec, PullPolicy, RestartPolicy};
use crate::reconcile::ReconcileConfig;
use crate::runtime::StateFlags;
use crate::test_support::{running, Call, MockRuntime, MockTransport};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

fn executor(runtime: &Arc<MockRuntime>, transport: &Arc<MockTransport>) -> TaskExecutor {
    let health = HealthRegistry::new();
    let engine = Arc::new(ReconciliationEngine::new(
        runtime.clone(),
        transport.clone(),
        "host-1",
        ReconcileConfig::default(),
        health.clone(),
    ));
    TaskExecutor::new(
        runtime.clone(),
        transport.clone(),
        engine,
        TaskConfig::default(),
        health,
    )
}

fn task(id: &str, task_type: TaskType, container_id: Option<&str>) -> Task {
    Task {
        id: id.to_string(),
        task_type,
        host_id: Some("host-1".to_string()),
        container_id: container_id.map(str::to_string),
        spec: None,
        force: false,
        timeout_secs: None,
        result: None,
    }
}

fn deploy_task(id: &str, pull_policy: PullPolicy) -> Task {
    Task {
        spec: Some(ContainerSpec {
            image: "nginx:1.25".into(),
            name: Some("web".into()),
            env: BTreeMap::new(),
            ports: vec![],
            command: None,
            working_dir: None,
            user: None,
            restart_policy: RestartPolicy::OnFailure,
            volumes: vec![],
            pull_policy,
        }),
        ..task(id, TaskType::Deploy, None)
    }
}

mod deploy_tests {
    use super::*;

    #[tokio::test]
    async fn test_deploy_creates_and_starts() {
        let runtime = Arc::new(MockRuntime::new());
        let transport = Arc::new(MockTransport::new());

        let result = executor(&runtime, &transport)
            .execute(&deploy_task("t1", PullPolicy::IfNotPresent))
            .await;

        assert!(result.success, "{}", result.message);
        let id = result.container_id.unwrap();
        assert_eq!(runtime.state(&id), Some(running()));
        assert_eq!(result.data["pulled"], true);
        assert_eq!(runtime.count("pull:nginx:1.25"), 1);
    }

    #[tokio::test]
    async fn test_deploy_cleans_up_when_start_fails() {
        let runtime = Arc::new(MockRuntime::new().with_image("nginx:1.25"));
        runtime.fail_start.store(true, Ordering::SeqCst);
        let transport = Arc::new(MockTransport::new());

        let result = executor(&runtime, &transport)
            .execute(&deploy_task("t1", PullPolicy::IfNotPresent))
            .await;

        assert!(!result.success);
        assert!(result.message.contains("port is already allocated"));
        assert_eq!(runtime.count("remove:new-0:force=true"), 1);
        assert!(!runtime.contains("new-0"));
    }

    #[tokio::test]
    async fn test_cleanup_failure_does_not_mask_start_error() {
        let runtime = Arc::new(MockRuntime::new().with_image("nginx:1.25"));
        runtime.fail_start.store(true, Ordering::SeqCst);
        runtime.fail_remove.store(true, Ordering::SeqCst);
        let transport = Arc::new(MockTransport::new());

        let result = executor(&runtime, &transport)
            .execute(&deploy_task("t1", PullPolicy::Never))
            .await;

        assert!(!result.success);
        assert!(result.message.contains("port is already allocated"));
    }

    #[tokio::test]
    async fn test_pull_policies() {
        let runtime = Arc::new(MockRuntime::new().with_image("nginx:1.25"));
        let transport = Arc::new(MockTransport::new());
        let executor = executor(&runtime, &transport);

        executor.execute(&deploy_task("t1", PullPolicy::IfNotPresent)).await;
        assert_eq!(runtime.count_prefix("pull:"), 0);

        executor.execute(&deploy_task("t2", PullPolicy::Never)).await;
        assert_eq!(runtime.count_prefix("inspect_image:"), 1);
        assert_eq!(runtime.count_prefix("pull:"), 0);

        executor.execute(&deploy_task("t3", PullPolicy::Always)).await;
        assert_eq!(runtime.count_prefix("pull:"), 1);
    }

    #[tokio::test]
    async fn test_deploy_without_spec_fails() {
        let runtime = Arc::new(MockRuntime::new());
        let transport = Arc::new(MockTransport::new());

        let result = executor(&runtime, &transport)
            .execute(&task("t1", TaskType::Deploy, None))
            .await;

        assert!(!result.success);
        assert_eq!(result.message, "deploy task carries no container spec");
        assert!(runtime.calls().is_empty());
    }
}

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_of_stopped_container_succeeds() {
        let runtime = Arc::new(MockRuntime::new().with_container("a", StateFlags::default()));
        let transport = Arc::new(MockTransport::new());

        let result = executor(&runtime, &transport)
            .execute(&task("t1", TaskType::Stop, Some("a")))
            .await;

        assert!(result.success);
        assert_eq!(result.message, "container already stopped");
    }

    #[tokio::test]
    async fn test_start_of_running_container_succeeds() {
        let runtime = Arc::new(MockRuntime::new().with_container("a", running()));
        let transport = Arc::new(MockTransport::new());

        let result = executor(&runtime, &transport)
            .execute(&task("t1", TaskType::Start, Some("a")))
            .await;

        assert!(result.success);
        assert_eq!(result.message, "container already running");
    }

    #[tokio::test]
    async fn test_restart_missing_container_fails() {
        let runtime = Arc::new(MockRuntime::new());
        let transport = Arc::new(MockTransport::new());

        let result = executor(&runtime, &transport)
            .execute(&task("t1", TaskType::Restart, Some("ghost")))
            .await;

        assert!(!result.success);
        assert_eq!(result.container_id.as_deref(), Some("ghost"));
    }

    #[tokio::test]
    async fn test_stop_without_container_id_fails() {
        let runtime = Arc::new(MockRuntime::new());
        let transport = Arc::new(MockTransport::new());

        let result = executor(&runtime, &transport)
            .execute(&task("t1", TaskType::Stop, None))
            .await;

        assert!(!result.success);
        assert_eq!(result.message, "stop task carries no container id");
    }

    #[tokio::test]
    async fn test_graceful_delete_stops_first() {
        let runtime = Arc::new(MockRuntime::new().with_container("a", running()));
        let transport = Arc::new(MockTransport::new());

        let result = executor(&runtime, &transport)
            .execute(&task("t1", TaskType::Delete, Some("a")))
            .await;

        assert!(result.success);
        assert_eq!(
            runtime.calls(),
            vec!["stop:a".to_string(), "remove:a:force=false".to_string()]
        );
    }

    #[tokio::test]
    async fn test_forced_delete_skips_stop() {
        let runtime = Arc::new(MockRuntime::new().with_container("a", running()));
        let transport = Arc::new(MockTransport::new());

        let forced = Task {
            force: true,
            ..task("t1", TaskType::Delete, Some("a"))
        };
        let result = executor(&runtime, &transport).execute(&forced).await;

        assert!(result.success);
        assert_eq!(runtime.calls(), vec!["remove:a:force=true".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_of_absent_container_succeeds() {
        let runtime = Arc::new(MockRuntime::new());
        let transport = Arc::new(MockTransport::new());

        let result = executor(&runtime, &transport)
            .execute(&task("t1", TaskType::Delete, Some("gone")))
            .await;

        assert!(result.success);
        assert_eq!(result.message, "container already absent");
    }
}

mod poll_tests {
    use super::*;

    #[tokio::test]
    async fn test_poll_reports_and_syncs_affected_container() {
        let runtime = Arc::new(MockRuntime::new().with_container("a", running()));
        let transport = Arc::new(
            MockTransport::new().with_task(task("t1", TaskType::Stop, Some("a"))),
        );

        let executed = executor(&runtime, &transport).poll_once().await.unwrap();

        assert_eq!(executed, 1);
        assert_eq!(transport.count(&Call::PendingTasks("host-1".into())), 1);
        assert_eq!(transport.count(&Call::Report("t1".into(), true)), 1);
        assert_eq!(
            transport.record("a").unwrap().status,
            crate::models::ContainerStatus::Stopped
        );
    }

    #[tokio::test]
    async fn test_delete_task_removes_central_record() {
        let runtime = Arc::new(MockRuntime::new().with_container("a", running()));
        let transport = Arc::new(
            MockTransport::new().with_task(task("t1", TaskType::Delete, Some("a"))),
        );

        executor(&runtime, &transport).poll_once().await.unwrap();

        assert_eq!(transport.count(&Call::Delete("a".into())), 1);
        assert_eq!(runtime.count("inspect:a"), 0);
    }

    #[tokio::test]
    async fn test_unreported_result_is_resent_not_reexecuted() {
        let runtime = Arc::new(MockRuntime::new().with_container("a", running()));
        let transport = Arc::new(
            MockTransport::new().with_task(task("t1", TaskType::Restart, Some("a"))),
        );
        transport.fail_report.store(true, Ordering::SeqCst);
        let executor = executor(&runtime, &transport);

        assert_eq!(executor.poll_once().await.unwrap(), 1);
        assert_eq!(executor.unreported_count(), 1);

        // Server still lists the task because it never saw a result
        transport.fail_report.store(false, Ordering::SeqCst);
        assert_eq!(executor.poll_once().await.unwrap(), 0);

        assert_eq!(runtime.count("restart:a"), 1);
        assert_eq!(executor.unreported_count(), 0);
        assert_eq!(transport.count(&Call::Report("t1".into(), true)), 2);
    }

    #[tokio::test]
    async fn test_failed_task_is_reported_as_failure() {
        let runtime = Arc::new(MockRuntime::new().with_image("nginx:1.25"));
        runtime.fail_start.store(true, Ordering::SeqCst);
        let transport =
            Arc::new(MockTransport::new().with_task(deploy_task("t1", PullPolicy::Never)));

        executor(&runtime, &transport).poll_once().await.unwrap();

        assert_eq!(transport.count(&Call::Report("t1".into(), false)), 1);
        assert_eq!(transport.upserts(), 0);
    }
}
