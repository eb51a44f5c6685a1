//! Helpers shared by the manager, drivers and live migration.

use serde_json::json;
use tracing::{error, warn};
use vmsched_core::{
    Destination, FilterProperties, Flavor, ImageMeta, InstanceProperties, RequestContext,
    RequestSpec, RetryState,
};
use vmsched_state::{InstanceFault, InstanceRecord, InstanceUpdate, store::epoch_secs};

use crate::collaborators::Collaborators;
use crate::error::{SchedulerError, SchedulerResult};

// ── Retry bookkeeping ─────────────────────────────────────────────

/// Count a scheduling attempt against `props.retry`.
///
/// Does nothing when retries are disabled (`max_attempts == 1`) or the
/// request is pinned to forced hosts or nodes. Fails once the attempt
/// count exceeds `max_attempts`.
pub fn populate_retry(
    props: &mut FilterProperties,
    instance_uuid: &str,
    max_attempts: u32,
) -> SchedulerResult<()> {
    if max_attempts == 1 || props.is_forced() {
        return Ok(());
    }

    let retry = props.retry.get_or_insert_with(|| RetryState::new(0));
    retry.num_attempts += 1;

    let last_exc = retry.exc.take();
    if let Some(exc) = &last_exc {
        match retry.hosts.last() {
            Some((host, node)) => {
                error!(%instance_uuid, %host, %node, "Error from last host: {exc}")
            }
            None => error!(%instance_uuid, "Error from last attempt: {exc}"),
        }
    }

    if retry.num_attempts > max_attempts {
        return Err(SchedulerError::no_valid_host(format!(
            "Exceeded max scheduling attempts {max_attempts} for instance {instance_uuid}. \
             Last exception: {}",
            last_exc.unwrap_or_default()
        )));
    }
    Ok(())
}

/// Record a chosen destination in the filter properties handed to compute.
///
/// The pair is appended to `retry.hosts` (when retry is active) so a
/// rescheduled attempt skips it. Limits travel with the request unless
/// hosts were forced.
pub fn populate_filter_properties(props: &mut FilterProperties, dest: &Destination) {
    if props.is_forced() {
        return;
    }
    if let Some(retry) = props.retry.as_mut() {
        retry.hosts.push((dest.host.clone(), dest.nodename.clone()));
    }
    props.limits = dest.limits.clone();
}

// ── Request specs ─────────────────────────────────────────────────

pub fn instance_properties(instance: &InstanceRecord) -> InstanceProperties {
    InstanceProperties {
        uuid: Some(instance.uuid.clone()),
        project_id: instance.project_id.clone(),
        vcpus: instance.vcpus,
        memory_mb: instance.memory_mb,
        root_gb: instance.root_gb,
        ephemeral_gb: instance.ephemeral_gb,
        os_type: instance.os_type.clone(),
        availability_zone: instance.availability_zone.clone(),
        image_ref: instance.image_ref.clone(),
    }
}

pub fn flavor_of(instance: &InstanceRecord) -> Flavor {
    Flavor {
        name: instance.instance_type.clone().unwrap_or_default(),
        vcpus: instance.vcpus,
        memory_mb: instance.memory_mb,
        root_gb: instance.root_gb,
        ephemeral_gb: instance.ephemeral_gb,
    }
}

/// Build a request spec describing existing instances.
///
/// Properties come from the first instance; the flavor defaults to that
/// instance's own shape.
pub fn build_request_spec(
    image: Option<ImageMeta>,
    instances: &[InstanceRecord],
    instance_type: Option<Flavor>,
) -> RequestSpec {
    let Some(first) = instances.first() else {
        return RequestSpec {
            image,
            instance_type,
            num_instances: Some(0),
            ..RequestSpec::default()
        };
    };
    RequestSpec {
        instance_properties: instance_properties(first),
        instance_type: Some(instance_type.unwrap_or_else(|| flavor_of(first))),
        instance_uuids: instances.iter().map(|i| i.uuid.clone()).collect(),
        num_instances: Some(instances.len() as u32),
        image,
    }
}

/// A copy of `spec` naming a single instance.
pub fn spec_for_instance(spec: &RequestSpec, instance_uuid: &str) -> RequestSpec {
    let mut spec = spec.clone();
    spec.instance_properties.uuid = Some(instance_uuid.to_string());
    spec
}

// ── State rollback ────────────────────────────────────────────────

/// Apply `updates` to the instance named by `request_spec`, record a fault
/// for `error`, and emit `{service}.{method}` on the error channel.
///
/// Never fails. Each step is attempted in order (update, fault, notify);
/// a failed update skips the fault but still notifies. With `error` set to
/// `None` no fault is written.
pub fn set_vm_state_and_notify(
    collaborators: &Collaborators,
    ctx: &RequestContext,
    service: &str,
    method: &str,
    updates: &InstanceUpdate,
    error: Option<&SchedulerError>,
    request_spec: &RequestSpec,
) {
    let reason = error.map(ToString::to_string);
    if let Some(reason) = &reason {
        warn!(%service, %method, "Failed to {service}_{method}: {reason}");
    }

    let instance_uuid = request_spec.instance_uuid();
    let state = updates.vm_state.map(|s| s.as_str());

    if let Some(uuid) = instance_uuid {
        warn!(
            instance_uuid = %uuid,
            "Setting instance to {} state.",
            state.unwrap_or("unchanged").to_uppercase()
        );
        match collaborators
            .instances
            .update_instance_and_get_original(ctx, uuid, updates)
        {
            Ok((_, new)) => {
                if let Some(err) = error {
                    let fault = InstanceFault {
                        instance_uuid: new.uuid.clone(),
                        code: err.fault_code(),
                        exception_type: err.type_name().to_string(),
                        message: err.to_string(),
                        details: format!("{err:?}"),
                        host: new.host.clone(),
                        created_at: epoch_secs(),
                    };
                    if let Err(e) = collaborators.instances.create_instance_fault(ctx, &fault) {
                        warn!(instance_uuid = %uuid, error = %e, "failed to record instance fault");
                    }
                }
            }
            Err(e) => {
                warn!(instance_uuid = %uuid, error = %e, "failed to restore instance state");
            }
        }
    }

    let payload = json!({
        "request_spec": request_spec,
        "instance_properties": request_spec.instance_properties,
        "instance_id": instance_uuid,
        "state": state,
        "method": method,
        "reason": reason,
    });
    let event_type = format!("{service}.{method}");
    if let Err(e) = collaborators.notifier.error(ctx, &event_type, payload) {
        warn!(%event_type, error = %e, "failed to emit notification");
    }
}
