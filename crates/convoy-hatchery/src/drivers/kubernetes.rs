//! Kubernetes driver: one batch/v1 Job per worker.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::batch::v1::{Job, JobSpec as K8sJobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use tracing::info;

use convoy_core::driver::{ComputeDriver, Instance, WorkerSpec};
use convoy_core::requirement::CapabilityProfile;
use convoy_core::{Error, Result};

const HATCHERY_LABEL: &str = "convoy/hatchery";

/// Runs workers as Kubernetes Jobs in one namespace.
pub struct KubernetesDriver {
    client: Client,
    namespace: String,
    hatchery_name: String,
    image: String,
    profile: CapabilityProfile,
}

impl KubernetesDriver {
    pub async fn new(
        namespace: impl Into<String>,
        hatchery_name: impl Into<String>,
        image: impl Into<String>,
        profile: CapabilityProfile,
    ) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self::with_client(client, namespace, hatchery_name, image, profile))
    }

    pub fn with_client(
        client: Client,
        namespace: impl Into<String>,
        hatchery_name: impl Into<String>,
        image: impl Into<String>,
        profile: CapabilityProfile,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            hatchery_name: hatchery_name.into(),
            image: image.into(),
            profile,
        }
    }

    fn jobs(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn worker_job(&self, spec: &WorkerSpec) -> Job {
        let mut env = vec![
            EnvVar {
                name: "CONVOY_WORKER_NAME".to_string(),
                value: Some(spec.name.clone()),
                ..Default::default()
            },
            EnvVar {
                name: "CONVOY_WORKER_TOKEN".to_string(),
                value: Some(spec.registration_token.clone()),
                ..Default::default()
            },
            EnvVar {
                name: "CONVOY_WORKER_MODEL".to_string(),
                value: Some(spec.model.clone()),
                ..Default::default()
            },
        ];
        if let Some(job_id) = spec.job_id {
            env.push(EnvVar {
                name: "CONVOY_BOOKED_JOB".to_string(),
                value: Some(job_id.to_string()),
                ..Default::default()
            });
        }
        env.extend(spec.env.iter().map(|(k, v)| EnvVar {
            name: k.clone(),
            value: Some(v.clone()),
            ..Default::default()
        }));

        let labels =
            BTreeMap::from([(HATCHERY_LABEL.to_string(), self.hatchery_name.clone())]);

        Job {
            metadata: ObjectMeta {
                name: Some(spec.name.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(K8sJobSpec {
                backoff_limit: Some(0),
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        restart_policy: Some("Never".to_string()),
                        containers: vec![Container {
                            name: "worker".to_string(),
                            image: Some(self.image.clone()),
                            env: Some(env),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }
}

#[async_trait]
impl ComputeDriver for KubernetesDriver {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    fn profile(&self) -> CapabilityProfile {
        self.profile.clone()
    }

    async fn spawn(&self, spec: WorkerSpec) -> Result<Instance> {
        let job = self.worker_job(&spec);
        info!(job = %spec.name, namespace = %self.namespace, "creating worker job");
        self.jobs()
            .create(&PostParams::default(), &job)
            .await
            .map_err(|e| Error::SpawnFailed(format!("create k8s job: {e}")))?;

        Ok(Instance {
            handle: spec.name.clone(),
            worker_name: spec.name,
            launched_at: Utc::now(),
        })
    }

    async fn terminate(&self, instance: &Instance) -> Result<()> {
        self.jobs()
            .delete(&instance.handle, &DeleteParams::background())
            .await
            .map_err(|e| Error::Internal(format!("delete k8s job: {e}")))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Instance>> {
        let params = ListParams::default()
            .labels(&format!("{HATCHERY_LABEL}={}", self.hatchery_name));
        let jobs = self
            .jobs()
            .list(&params)
            .await
            .map_err(|e| Error::Internal(format!("list k8s jobs: {e}")))?;

        Ok(jobs
            .items
            .into_iter()
            .filter_map(|job| {
                let name = job.metadata.name?;
                let launched_at = job
                    .metadata
                    .creation_timestamp
                    .map(|t| t.0)
                    .unwrap_or_else(Utc::now);
                Some(Instance {
                    handle: name.clone(),
                    worker_name: name,
                    launched_at,
                })
            })
            .collect())
    }
}
