use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

fn get_host() -> cpal::Host {
    cpal::default_host()
}

/// Returns the input device with the given name, or the host default when no
/// name is provided.
pub fn get_or_default_input(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    match device_name {
        Some(target) => host
            .input_devices()?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .ok_or_else(|| anyhow::anyhow!("no input device named {target:?}")),
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow::anyhow!("no default input device")),
    }
}

/// Returns the output device with the given name, or the host default when no
/// name is provided.
pub fn get_or_default_output(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();
    match device_name {
        Some(target) => host
            .output_devices()?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .ok_or_else(|| anyhow::anyhow!("no output device named {target:?}")),
        None => host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("no default output device")),
    }
}
