//! Integration tests for cluster lifecycle scenarios.

mod common;

use std::time::Duration;

use common::fixtures::{amazon_resize, empty_amazon_update, RequestBuilder};
use common::TestEngine;
use meridian_control::cluster::MockOp;
use meridian_control::{
    CloudProvider, ClusterConfig, ClusterFilter, ClusterStatus, ClusterStore, ControlError,
    TaskStatus,
};

#[tokio::test]
async fn create_through_update_to_delete() {
    let engine = TestEngine::new().await;

    // Minimal request; profile fills everything but name and cloud
    let record = engine
        .manager
        .create_cluster(RequestBuilder::on_amazon("web_prod").build())
        .await
        .unwrap();
    assert_eq!(record.status, ClusterStatus::Created);
    assert!(record.data.provider_ref.is_some());
    assert!(engine.mock.contains("web_prod"));

    // Post-provisioning runs in the background; wait for it
    engine.manager.shutdown().await;
    let tasks = engine.manager.tasks().records();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].label, "post-provision");
    assert_eq!(tasks[0].status, TaskStatus::Succeeded);
    assert_eq!(
        engine.installer.installed("web_prod"),
        vec!["tiller", "ingress-controller"]
    );

    // The pipeline fetched and cached credentials; later calls hit the cache
    assert_eq!(engine.mock.credential_fetches(), 1);
    let kube_config = engine
        .manager
        .cluster_credentials(&record.data.id)
        .await
        .unwrap();
    assert!(String::from_utf8(kube_config).unwrap().contains("web_prod"));
    assert_eq!(engine.mock.credential_fetches(), 1);

    // Resize pool1 from one node to two
    let updated = engine
        .manager
        .update_cluster(&record.data.id, amazon_resize(2))
        .await
        .unwrap();
    assert_eq!(updated.status, ClusterStatus::Created);
    let ClusterConfig::Amazon(config) = &updated.data.config else {
        panic!("expected amazon config, got {:?}", updated.data.config);
    };
    assert_eq!(config.node_pools["pool1"].count, 2);

    let snapshot = engine.manager.cluster_status(&record.data.id).await.unwrap();
    assert_eq!(snapshot.provider_state.as_deref(), Some("Running"));
    assert_eq!(snapshot.node_count, Some(2));

    // Delete removes the record outright and frees the name
    let receipt = engine
        .manager
        .delete_cluster(&record.data.id, false)
        .await
        .unwrap();
    assert_eq!(receipt.message, "cluster deleted");
    assert!(!engine.mock.contains("web_prod"));
    assert!(engine
        .manager
        .clusters(&ClusterFilter::new())
        .await
        .unwrap()
        .is_empty());

    let err = engine
        .manager
        .cluster_status(&record.data.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::ClusterNotFound(_)));

    // The name is reusable immediately
    engine
        .manager
        .create_cluster(RequestBuilder::on_amazon("web_prod").build())
        .await
        .unwrap();
    engine.manager.shutdown().await;
}

#[tokio::test]
async fn failed_create_leaves_errored_record() {
    let engine = TestEngine::new().await;
    engine.mock.fail(MockOp::Create, "quota exceeded in eu-west-1");

    let err = engine
        .manager
        .create_cluster(RequestBuilder::on_amazon("web_prod").build())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("quota exceeded"));

    // The record stays behind in error state with the failure message
    let record = engine.store.find_by_name("web_prod").await.unwrap().unwrap();
    assert_eq!(record.status, ClusterStatus::Error);
    assert!(record
        .data
        .status_message
        .as_deref()
        .unwrap()
        .contains("quota exceeded"));
    assert!(record.data.provider_ref.is_none());

    // No provider resources, no pipeline task
    assert!(!engine.mock.contains("web_prod"));
    engine.manager.shutdown().await;
    assert!(engine.manager.tasks().records().is_empty());

    // The errored record can still be deleted without force
    let receipt = engine
        .manager
        .delete_cluster(&record.data.id, false)
        .await
        .unwrap();
    assert_eq!(receipt.message, "cluster deleted");
    assert!(engine.store.get(&record.data.id).await.unwrap().is_none());
    engine.manager.shutdown().await;
}

#[tokio::test]
async fn duplicate_names_are_refused() {
    let engine = TestEngine::new().await;
    engine
        .manager
        .create_cluster(RequestBuilder::on_amazon("web_prod").build())
        .await
        .unwrap();

    let err = engine
        .manager
        .create_cluster(RequestBuilder::on_amazon("web_prod").build())
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::DuplicateName { .. }));
    assert_eq!(
        engine
            .manager
            .clusters(&ClusterFilter::new())
            .await
            .unwrap()
            .len(),
        1
    );
    engine.manager.shutdown().await;
}

#[tokio::test]
async fn update_on_errored_cluster_is_refused() {
    let engine = TestEngine::new().await;
    engine.mock.fail(MockOp::Create, "quota exceeded");
    engine
        .manager
        .create_cluster(RequestBuilder::on_amazon("web_prod").build())
        .await
        .unwrap_err();
    let record = engine.store.find_by_name("web_prod").await.unwrap().unwrap();

    let err = engine
        .manager
        .update_cluster(&record.data.id, amazon_resize(2))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControlError::ClusterNotReady {
            status: ClusterStatus::Error
        }
    ));
}

#[tokio::test]
async fn cloud_of_running_cluster_cannot_change() {
    let engine = TestEngine::new().await;
    let record = engine
        .manager
        .create_cluster(RequestBuilder::on_amazon("web_prod").build())
        .await
        .unwrap();
    engine.manager.shutdown().await;

    let mut request = amazon_resize(2);
    request.cloud = CloudProvider::Google;
    let err = engine
        .manager
        .update_cluster(&record.data.id, request)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Validation(_)));
    assert!(err.to_string().contains("cannot change"));
}

#[tokio::test]
async fn empty_update_changes_nothing() {
    let engine = TestEngine::new().await;
    let record = engine
        .manager
        .create_cluster(RequestBuilder::on_amazon("web_prod").build())
        .await
        .unwrap();
    engine.manager.shutdown().await;

    // An empty request fills from the running configuration and matches it
    let err = engine
        .manager
        .update_cluster(&record.data.id, empty_amazon_update())
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::NoChangeRequested));

    // Re-submitting the current pools is a no-op too
    let err = engine
        .manager
        .update_cluster(&record.data.id, amazon_resize(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::NoChangeRequested));

    // Status untouched by the refusals
    let stored = engine.store.get(&record.data.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ClusterStatus::Created);
}

#[tokio::test]
async fn failed_teardown_without_force_leaves_error() {
    let engine = TestEngine::new().await;
    let record = engine
        .manager
        .create_cluster(RequestBuilder::on_amazon("web_prod").build())
        .await
        .unwrap();
    engine.manager.shutdown().await;

    engine.mock.fail(MockOp::Delete, "deletion api down");
    let err = engine
        .manager
        .delete_cluster(&record.data.id, false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("deletion api down"));

    // The record survives in error state; provider resources remain
    let stored = engine.store.get(&record.data.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ClusterStatus::Error);
    assert!(engine.mock.contains("web_prod"));

    // Forced delete removes the record even though the provider still fails
    let receipt = engine
        .manager
        .delete_cluster(&record.data.id, true)
        .await
        .unwrap();
    assert_eq!(receipt.message, "cluster deleted (forced)");
    assert!(engine.store.get(&record.data.id).await.unwrap().is_none());

    // The orphaned provider resources are the operator's to chase
    assert!(engine.mock.contains("web_prod"));
    engine.manager.shutdown().await;
}

#[tokio::test]
async fn delete_mid_operation_requires_force() {
    let engine = TestEngine::new().await;
    let record = engine
        .manager
        .create_cluster(RequestBuilder::on_amazon("web_prod").build())
        .await
        .unwrap();
    engine.manager.shutdown().await;

    // Park the record mid-update, as if the engine died between submit
    // and acknowledgement
    engine
        .store
        .update_status(&record.data.id, ClusterStatus::Updating, None)
        .await
        .unwrap();

    let err = engine
        .manager
        .delete_cluster(&record.data.id, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControlError::ClusterNotReady {
            status: ClusterStatus::Updating
        }
    ));

    let receipt = engine
        .manager
        .delete_cluster(&record.data.id, true)
        .await
        .unwrap();
    assert_eq!(receipt.message, "cluster deleted (forced)");
    assert!(!engine.mock.contains("web_prod"));
    engine.manager.shutdown().await;
}

#[tokio::test]
async fn delete_survives_package_cleanup_failure() {
    let engine = TestEngine::new().await;
    let record = engine
        .manager
        .create_cluster(RequestBuilder::on_amazon("web_prod").build())
        .await
        .unwrap();
    engine.manager.shutdown().await;
    assert_eq!(
        engine.installer.installed("web_prod"),
        vec!["tiller", "ingress-controller"]
    );

    // Package cleanup is best effort; a stuck release never blocks teardown
    engine
        .installer
        .fail_uninstall_for("web_prod", "release ledger corrupted");
    let receipt = engine
        .manager
        .delete_cluster(&record.data.id, false)
        .await
        .unwrap();
    assert_eq!(receipt.message, "cluster deleted");

    assert!(engine.store.get(&record.data.id).await.unwrap().is_none());
    assert!(!engine.mock.contains("web_prod"));
    engine.manager.shutdown().await;
}

#[tokio::test]
async fn delete_proceeds_when_credentials_fail() {
    let engine = TestEngine::new().await;
    let record = engine
        .manager
        .create_cluster(RequestBuilder::on_amazon("web_prod").build())
        .await
        .unwrap();
    engine.manager.shutdown().await;

    engine.mock.fail(MockOp::Credentials, "token service down");
    let receipt = engine
        .manager
        .delete_cluster(&record.data.id, false)
        .await
        .unwrap();
    assert_eq!(receipt.message, "cluster deleted");

    // Provider teardown still ran and the record is gone
    assert!(!engine.mock.contains("web_prod"));
    assert!(engine.store.get(&record.data.id).await.unwrap().is_none());
    // With no credentials the uninstall was skipped, not attempted
    assert_eq!(
        engine.installer.installed("web_prod"),
        vec!["tiller", "ingress-controller"]
    );
    engine.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn provider_timeout_is_reported() {
    let engine = TestEngine::with_call_timeout(1).await;
    engine.mock.set_latency(Duration::from_secs(5));

    let err = engine
        .manager
        .create_cluster(RequestBuilder::on_amazon("web_prod").build())
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::ProviderTimeout { seconds: 1 }));

    let record = engine.store.find_by_name("web_prod").await.unwrap().unwrap();
    assert_eq!(record.status, ClusterStatus::Error);
    assert!(record
        .data
        .status_message
        .as_deref()
        .unwrap()
        .contains("timed out"));
}

#[tokio::test]
async fn azure_create_requires_resource_group() {
    let engine = TestEngine::new().await;

    let err = engine
        .manager
        .create_cluster(RequestBuilder::on_azure("edge1").build())
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Validation(_)));
    assert!(err.to_string().contains("resource group"));

    let record = engine
        .manager
        .create_cluster(
            RequestBuilder::on_azure("edge1")
                .with_resource_group("rg-live")
                .build(),
        )
        .await
        .unwrap();
    let ClusterConfig::Azure(config) = &record.data.config else {
        panic!("expected azure config, got {:?}", record.data.config);
    };
    assert_eq!(config.resource_group, "rg-live");
    assert_eq!(config.kubernetes_version, "1.9.2");

    // The provider saw a camelCase managed-cluster document
    let managed = engine.mock.cluster("edge1").unwrap();
    assert_eq!(managed.payload["location"], "eastus");
    assert_eq!(
        managed.payload["properties"]["agentPoolProfiles"][0]["vmSize"],
        "Standard_D2_v2"
    );
    engine.manager.shutdown().await;
}

#[tokio::test]
async fn google_create_fills_profile_versions() {
    let engine = TestEngine::new().await;
    let record = engine
        .manager
        .create_cluster(RequestBuilder::on_google("data_sci").build())
        .await
        .unwrap();

    let ClusterConfig::Google(config) = &record.data.config else {
        panic!("expected google config, got {:?}", record.data.config);
    };
    assert_eq!(config.location, "us-central1-a");
    assert_eq!(config.master_version, "1.10");
    assert_eq!(config.node_version, "1.10");
    assert_eq!(
        engine.mock.cluster("data_sci").unwrap().cloud,
        CloudProvider::Google
    );
    engine.manager.shutdown().await;
}

#[tokio::test]
async fn request_location_overrides_profile() {
    let engine = TestEngine::new().await;
    let record = engine
        .manager
        .create_cluster(
            RequestBuilder::on_amazon("web_prod")
                .with_location("us-east-2")
                .build(),
        )
        .await
        .unwrap();

    assert_eq!(record.data.config.location(), "us-east-2");
    assert_eq!(engine.mock.cluster("web_prod").unwrap().location, "us-east-2");
    engine.manager.shutdown().await;
}
