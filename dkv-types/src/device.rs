//! Device descriptions returned by the device-list query.

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: String,
    pub device_name: String,
    pub device_type: String,
}

impl DeviceInfo {
    pub fn new(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        device_type: impl Into<String>,
    ) -> Self {
        DeviceInfo {
            device_id: device_id.into(),
            device_name: device_name.into(),
            device_type: device_type.into(),
        }
    }
}
