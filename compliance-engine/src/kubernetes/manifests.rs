//! Manifest builders for ephemeral probe objects

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, LocalObjectReference, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PodAffinityTerm, PodAntiAffinity, PodSecurityContext, PodSpec, PodTemplateSpec,
    ResourceRequirements, Secret, Service, ServiceSpec, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use k8s_openapi::ByteString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";
const APP_LABEL: &str = "app";

/// Volume claim template attached to a probe workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeClaimSpec {
    pub name: String,
    pub mount_path: String,
    pub size: String,
    pub storage_class: Option<String>,
}

/// Stateful probe workload: `replicas` idle pods spread across distinct nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeWorkloadSpec {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub replicas: i32,
    pub pull_secret: Option<String>,
    pub volume: Option<VolumeClaimSpec>,
    pub service_name: Option<String>,
}

impl ProbeWorkloadSpec {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            image: image.into(),
            replicas: 1,
            pull_secret: None,
            volume: None,
            service_name: None,
        }
    }

    pub fn replicas(mut self, replicas: i32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn pull_secret(mut self, secret: Option<String>) -> Self {
        self.pull_secret = secret;
        self
    }

    pub fn volume(mut self, volume: VolumeClaimSpec) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Governing headless service giving the pods stable DNS names
    pub fn service(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Label selector matching the workload's pods and volume claims
    pub fn selector(&self) -> String {
        format!("{}={}", APP_LABEL, self.name)
    }

    pub fn to_manifest(&self) -> StatefulSet {
        let labels = app_labels(&self.name);

        let volume_mounts = self.volume.as_ref().map(|volume| {
            vec![VolumeMount {
                name: volume.name.clone(),
                mount_path: volume.mount_path.clone(),
                ..Default::default()
            }]
        });

        let volume_claim_templates = self.volume.as_ref().map(|volume| {
            let mut requests = BTreeMap::new();
            requests.insert("storage".to_string(), Quantity(volume.size.clone()));

            vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(volume.name.clone()),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                    storage_class_name: volume.storage_class.clone(),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(requests),
                        limits: None,
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]
        });

        let mut limits = BTreeMap::new();
        limits.insert("memory".to_string(), Quantity("512Mi".to_string()));
        limits.insert("cpu".to_string(), Quantity("100m".to_string()));

        let anti_affinity = PodAntiAffinity {
            required_during_scheduling_ignored_during_execution: Some(vec![PodAffinityTerm {
                topology_key: "kubernetes.io/hostname".to_string(),
                label_selector: Some(LabelSelector {
                    match_expressions: Some(vec![LabelSelectorRequirement {
                        key: APP_LABEL.to_string(),
                        operator: "In".to_string(),
                        values: Some(vec![self.name.clone()]),
                    }]),
                    match_labels: None,
                }),
                ..Default::default()
            }]),
            ..Default::default()
        };

        StatefulSet {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                replicas: Some(self.replicas),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    match_expressions: None,
                },
                service_name: self.service_name.clone().unwrap_or_default(),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        name: Some(self.name.clone()),
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        security_context: Some(PodSecurityContext {
                            fs_group: Some(1000),
                            ..Default::default()
                        }),
                        affinity: Some(Affinity {
                            pod_anti_affinity: Some(anti_affinity),
                            ..Default::default()
                        }),
                        containers: vec![Container {
                            name: self.name.clone(),
                            image: Some(self.image.clone()),
                            image_pull_policy: Some("IfNotPresent".to_string()),
                            command: Some(vec![
                                "tail".to_string(),
                                "-f".to_string(),
                                "/dev/null".to_string(),
                            ]),
                            resources: Some(ResourceRequirements {
                                limits: Some(limits.clone()),
                                requests: Some(limits),
                                ..Default::default()
                            }),
                            volume_mounts,
                            ..Default::default()
                        }],
                        image_pull_secrets: self.pull_secret.as_ref().map(|secret| {
                            vec![LocalObjectReference {
                                name: secret.clone(),
                            }]
                        }),
                        ..Default::default()
                    }),
                },
                volume_claim_templates,
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Headless service selecting pods labelled `app=<name>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadlessServiceSpec {
    pub name: String,
    pub namespace: String,
}

impl HeadlessServiceSpec {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn to_manifest(&self) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(app_labels(&self.name)),
                cluster_ip: Some("None".to_string()),
                type_: Some("ClusterIP".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Secret with plain (not yet base64 encoded) values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSpec {
    pub name: String,
    pub namespace: String,
    pub secret_type: String,
    #[serde(default, skip_serializing)]
    pub data: BTreeMap<String, String>,
}

impl SecretSpec {
    /// Image pull secret holding a docker config document
    pub fn docker_config(
        name: impl Into<String>,
        namespace: impl Into<String>,
        config_json: impl Into<String>,
    ) -> Self {
        let mut data = BTreeMap::new();
        data.insert(DOCKER_CONFIG_JSON_KEY.to_string(), config_json.into());

        Self {
            name: name.into(),
            namespace: namespace.into(),
            secret_type: DOCKER_CONFIG_JSON_TYPE.to_string(),
            data,
        }
    }

    pub fn to_manifest(&self) -> Secret {
        // ByteString is base64 encoded on serialization
        let data = self
            .data
            .iter()
            .map(|(k, v)| (k.clone(), ByteString(v.as_bytes().to_vec())))
            .collect();

        Secret {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            type_: Some(self.secret_type.clone()),
            data: Some(data),
            ..Default::default()
        }
    }

    /// Metadata view of an existing secret; values are not carried over
    pub fn from_manifest(secret: &Secret) -> Self {
        Self {
            name: secret.metadata.name.clone().unwrap_or_default(),
            namespace: secret.metadata.namespace.clone().unwrap_or_default(),
            secret_type: secret.type_.clone().unwrap_or_else(|| "Opaque".to_string()),
            data: BTreeMap::new(),
        }
    }
}

fn app_labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(APP_LABEL.to_string(), name.to_string());
    labels
}
