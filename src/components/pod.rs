//! # Pod Spec Utilities
//!
//! Helpers for mutating the pod template of any workload kind. Deployers use
//! them to mount credential records into the workloads they render.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec, Volume, VolumeMount};

/// Closed set of objects that carry a pod spec
#[derive(Debug)]
pub enum Workload<'a> {
    Pod(&'a mut Pod),
    Deployment(&'a mut Deployment),
    StatefulSet(&'a mut StatefulSet),
    DaemonSet(&'a mut DaemonSet),
    Job(&'a mut Job),
    CronJob(&'a mut CronJob),
    ReplicaSet(&'a mut ReplicaSet),
}

impl Workload<'_> {
    /// The pod spec, if the object has one set
    pub fn pod_spec_mut(&mut self) -> Option<&mut PodSpec> {
        match self {
            Workload::Pod(pod) => pod.spec.as_mut(),
            Workload::Deployment(d) => d.spec.as_mut()?.template.spec.as_mut(),
            Workload::StatefulSet(s) => s.spec.as_mut()?.template.spec.as_mut(),
            Workload::DaemonSet(d) => d.spec.as_mut()?.template.spec.as_mut(),
            Workload::Job(j) => j.spec.as_mut()?.template.spec.as_mut(),
            Workload::CronJob(c) => c
                .spec
                .as_mut()?
                .job_template
                .spec
                .as_mut()?
                .template
                .spec
                .as_mut(),
            Workload::ReplicaSet(r) => r.spec.as_mut()?.template.as_mut()?.spec.as_mut(),
        }
    }

    /// Run `visit` on the pod spec; returns whether there was one
    pub fn visit_pod_spec<F>(&mut self, visit: F) -> bool
    where
        F: FnOnce(&mut PodSpec),
    {
        match self.pod_spec_mut() {
            Some(spec) => {
                visit(spec);
                true
            }
            None => false,
        }
    }

    /// Run `visit` on init and regular containers, restricted to `names` unless empty
    pub fn visit_containers<F>(&mut self, names: &[&str], visit: F)
    where
        F: FnMut(&mut Container),
    {
        self.visit_pod_spec(|spec| visit_containers(spec, names, visit));
    }

    pub fn add_volume(&mut self, volume: Volume, overwrite: bool) {
        self.visit_pod_spec(|spec| add_volume(spec, volume, overwrite));
    }

    pub fn add_volume_mount(&mut self, names: &[&str], mount: &VolumeMount, overwrite: bool) {
        self.visit_containers(names, |c| add_volume_mount(c, mount.clone(), overwrite));
    }

    pub fn add_env_var(&mut self, names: &[&str], env: &EnvVar, overwrite: bool) {
        self.visit_containers(names, |c| add_env_var(c, env.clone(), overwrite));
    }
}

pub fn visit_containers<F>(spec: &mut PodSpec, names: &[&str], mut visit: F)
where
    F: FnMut(&mut Container),
{
    let selected = |c: &Container| names.is_empty() || names.contains(&c.name.as_str());
    let init = spec.init_containers.iter_mut().flatten();
    for container in init.chain(spec.containers.iter_mut()) {
        if selected(container) {
            visit(container);
        }
    }
}

/// Upsert by name into a list; an existing entry is replaced only when `overwrite`
fn upsert<T>(items: &mut Vec<T>, item: T, overwrite: bool, name: impl Fn(&T) -> &str) {
    match items.iter().position(|existing| name(existing) == name(&item)) {
        Some(index) if overwrite => items[index] = item,
        Some(_) => {}
        None => items.push(item),
    }
}

pub fn add_volume(spec: &mut PodSpec, volume: Volume, overwrite: bool) {
    let volumes = spec.volumes.get_or_insert_with(Vec::new);
    upsert(volumes, volume, overwrite, |v| v.name.as_str());
}

pub fn add_volume_mount(container: &mut Container, mount: VolumeMount, overwrite: bool) {
    let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
    upsert(mounts, mount, overwrite, |m| m.name.as_str());
}

pub fn add_env_var(container: &mut Container, env: EnvVar, overwrite: bool) {
    let vars = container.env.get_or_insert_with(Vec::new);
    upsert(vars, env, overwrite, |e| e.name.as_str());
}

#[must_use]
pub fn has_env_var(container: &Container, name: &str) -> bool {
    container
        .env
        .iter()
        .flatten()
        .any(|env| env.name == name)
}

/// Merge maps left to right; later maps win and `None` entries are skipped
#[must_use]
pub fn merge_string_maps(maps: &[Option<&BTreeMap<String, String>>]) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    for map in maps.iter().flatten() {
        merged.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}
