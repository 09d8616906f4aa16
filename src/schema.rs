//! Object schemas
//!
//! Every object type is described by an [`ObjectSchema`] keyed by its Object
//! ID. New object types are supported by registering another schema with the
//! resource model; there is no per-object code.

use std::collections::BTreeMap;

use crate::value::ValueKind;

/// Well-known Object IDs
pub mod object_id {
    pub const SECURITY: u16 = 0;
    pub const SERVER: u16 = 1;
    pub const DEVICE: u16 = 3;
    pub const CONNECTIVITY_MONITORING: u16 = 4;
    pub const LOCATION: u16 = 6;
    pub const TEMPERATURE: u16 = 3303;
    pub const HUMIDITY: u16 = 3304;
}

/// IPSO sensor resource IDs shared by 3303 and 3304
pub mod ipso {
    pub const MIN_MEASURED: u16 = 5601;
    pub const MAX_MEASURED: u16 = 5602;
    pub const MIN_RANGE: u16 = 5603;
    pub const MAX_RANGE: u16 = 5604;
    pub const RESET_MIN_MAX: u16 = 5605;
    pub const SENSOR_VALUE: u16 = 5700;
    pub const SENSOR_UNITS: u16 = 5701;
    pub const APPLICATION_TYPE: u16 = 5750;
}

/// Network access mode of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operations {
    Read,
    Write,
    ReadWrite,
    Execute,
}

impl Operations {
    pub fn readable(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    pub fn executable(self) -> bool {
        self == Self::Execute
    }
}

/// Definition of one resource within an object
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDef {
    pub id: u16,
    pub name: String,
    pub kind: ValueKind,
    pub operations: Operations,
    pub multiple: bool,
    pub mandatory: bool,
    pub units: Option<String>,
}

impl ResourceDef {
    pub fn new(id: u16, name: &str, kind: ValueKind, operations: Operations) -> Self {
        Self {
            id,
            name: name.to_string(),
            kind,
            operations,
            multiple: false,
            mandatory: false,
            units: None,
        }
    }

    /// Read-only single-instance resource
    pub fn read(id: u16, name: &str, kind: ValueKind) -> Self {
        Self::new(id, name, kind, Operations::Read)
    }

    /// Read-write single-instance resource
    pub fn read_write(id: u16, name: &str, kind: ValueKind) -> Self {
        Self::new(id, name, kind, Operations::ReadWrite)
    }

    /// Executable resource
    pub fn execute(id: u16, name: &str) -> Self {
        Self::new(id, name, ValueKind::None, Operations::Execute)
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn units(mut self, units: &str) -> Self {
        self.units = Some(units.to_string());
        self
    }
}

/// Schema of an LwM2M object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSchema {
    pub id: u16,
    pub name: String,
    /// Object may hold more than one instance
    pub multiple_instances: bool,
    /// Object must be instantiated before registering
    pub mandatory: bool,
    pub resources: BTreeMap<u16, ResourceDef>,
}

impl ObjectSchema {
    pub fn new(id: u16, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            multiple_instances: false,
            mandatory: false,
            resources: BTreeMap::new(),
        }
    }

    pub fn multiple_instances(mut self) -> Self {
        self.multiple_instances = true;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn with(mut self, def: ResourceDef) -> Self {
        self.resources.insert(def.id, def);
        self
    }

    /// Look up a resource definition
    pub fn resource(&self, id: u16) -> Option<&ResourceDef> {
        self.resources.get(&id)
    }

    /// LwM2M Security (0)
    pub fn security() -> Self {
        Self::new(object_id::SECURITY, "LwM2M Security")
            .multiple_instances()
            .mandatory()
            .with(ResourceDef::read(0, "LwM2M Server URI", ValueKind::String).mandatory())
            .with(ResourceDef::read(1, "Bootstrap-Server", ValueKind::Boolean).mandatory())
            .with(ResourceDef::read(2, "Security Mode", ValueKind::Integer).mandatory())
            .with(ResourceDef::read(10, "Short Server ID", ValueKind::Integer))
            .with(ResourceDef::read(11, "Client Hold Off Time", ValueKind::Integer).units("s"))
    }

    /// LwM2M Server (1)
    pub fn server() -> Self {
        Self::new(object_id::SERVER, "LwM2M Server")
            .multiple_instances()
            .mandatory()
            .with(ResourceDef::read(0, "Short Server ID", ValueKind::Integer).mandatory())
            .with(
                ResourceDef::read_write(1, "Lifetime", ValueKind::Integer)
                    .mandatory()
                    .units("s"),
            )
            .with(ResourceDef::read_write(2, "Default Minimum Period", ValueKind::Integer).units("s"))
            .with(ResourceDef::read_write(3, "Default Maximum Period", ValueKind::Integer).units("s"))
            .with(ResourceDef::execute(4, "Disable"))
            .with(ResourceDef::read_write(5, "Disable Timeout", ValueKind::Integer).units("s"))
            .with(
                ResourceDef::read_write(6, "Notification Storing When Disabled or Offline", ValueKind::Boolean)
                    .mandatory(),
            )
            .with(ResourceDef::read_write(7, "Binding", ValueKind::String).mandatory())
            .with(ResourceDef::execute(8, "Registration Update Trigger").mandatory())
    }

    /// LwM2M Device (3)
    pub fn device() -> Self {
        Self::new(object_id::DEVICE, "Device")
            .mandatory()
            .with(ResourceDef::read(0, "Manufacturer", ValueKind::String))
            .with(ResourceDef::read(1, "Model Number", ValueKind::String))
            .with(ResourceDef::read(2, "Serial Number", ValueKind::String))
            .with(ResourceDef::read(3, "Firmware Version", ValueKind::String))
            .with(ResourceDef::execute(4, "Reboot").mandatory())
            .with(ResourceDef::execute(5, "Factory Reset"))
            .with(ResourceDef::read(6, "Available Power Sources", ValueKind::Integer).multiple())
            .with(
                ResourceDef::read(7, "Power Source Voltage", ValueKind::Integer)
                    .multiple()
                    .units("mV"),
            )
            .with(ResourceDef::read(9, "Battery Level", ValueKind::Integer).units("%"))
            .with(ResourceDef::read(10, "Memory Free", ValueKind::Integer).units("KB"))
            .with(
                ResourceDef::read(11, "Error Code", ValueKind::Integer)
                    .multiple()
                    .mandatory(),
            )
            .with(ResourceDef::read_write(13, "Current Time", ValueKind::Time))
            .with(ResourceDef::read_write(14, "UTC Offset", ValueKind::String))
            .with(ResourceDef::read_write(15, "Timezone", ValueKind::String))
            .with(ResourceDef::read(16, "Supported Binding and Modes", ValueKind::String).mandatory())
    }

    /// LwM2M Connectivity Monitoring (4)
    pub fn connectivity_monitoring() -> Self {
        Self::new(object_id::CONNECTIVITY_MONITORING, "Connectivity Monitoring")
            .with(ResourceDef::read(0, "Network Bearer", ValueKind::Integer).mandatory())
            .with(
                ResourceDef::read(1, "Available Network Bearer", ValueKind::Integer)
                    .multiple()
                    .mandatory(),
            )
            .with(
                ResourceDef::read(2, "Radio Signal Strength", ValueKind::Integer)
                    .mandatory()
                    .units("dBm"),
            )
            .with(
                ResourceDef::read(4, "IP Addresses", ValueKind::String)
                    .multiple()
                    .mandatory(),
            )
            .with(ResourceDef::read(5, "Router IP Addresses", ValueKind::String).multiple())
            .with(ResourceDef::read(8, "Cell ID", ValueKind::Integer))
            .with(ResourceDef::read(9, "SMNC", ValueKind::Integer))
            .with(ResourceDef::read(10, "SMCC", ValueKind::Integer))
            .with(ResourceDef::read(11, "Link Quality", ValueKind::Integer).units("%"))
            .with(ResourceDef::read(12, "Link Utilization", ValueKind::Integer).units("%"))
    }

    /// LwM2M Location (6)
    pub fn location() -> Self {
        Self::new(object_id::LOCATION, "Location")
            .with(ResourceDef::read(0, "Latitude", ValueKind::Float).mandatory().units("lat"))
            .with(ResourceDef::read(1, "Longitude", ValueKind::Float).mandatory().units("lon"))
            .with(ResourceDef::read(2, "Altitude", ValueKind::Float).units("m"))
            .with(ResourceDef::read(3, "Radius", ValueKind::Float).units("m"))
            .with(ResourceDef::read(5, "Timestamp", ValueKind::Time).mandatory())
            .with(ResourceDef::read(6, "Speed", ValueKind::Float).units("m/s"))
    }

    /// IPSO Temperature (3303)
    pub fn temperature() -> Self {
        Self::ipso_sensor(object_id::TEMPERATURE, "Temperature", "Cel")
    }

    /// IPSO Humidity (3304)
    pub fn humidity() -> Self {
        Self::ipso_sensor(object_id::HUMIDITY, "Humidity", "%RH")
    }

    fn ipso_sensor(id: u16, name: &str, units: &str) -> Self {
        Self::new(id, name)
            .multiple_instances()
            .with(
                ResourceDef::read(ipso::SENSOR_VALUE, "Sensor Value", ValueKind::Float)
                    .mandatory()
                    .units(units),
            )
            .with(ResourceDef::read(ipso::SENSOR_UNITS, "Sensor Units", ValueKind::String))
            .with(ResourceDef::read(ipso::MIN_MEASURED, "Min Measured Value", ValueKind::Float).units(units))
            .with(ResourceDef::read(ipso::MAX_MEASURED, "Max Measured Value", ValueKind::Float).units(units))
            .with(ResourceDef::read(ipso::MIN_RANGE, "Min Range Value", ValueKind::Float).units(units))
            .with(ResourceDef::read(ipso::MAX_RANGE, "Max Range Value", ValueKind::Float).units(units))
            .with(ResourceDef::execute(ipso::RESET_MIN_MAX, "Reset Min and Max Measured Values"))
            .with(ResourceDef::read_write(ipso::APPLICATION_TYPE, "Application Type", ValueKind::String))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_schema() {
        let device = ObjectSchema::device();
        assert!(device.mandatory);
        assert!(!device.multiple_instances);

        let battery = device.resource(9).unwrap();
        assert_eq!(battery.kind, ValueKind::Integer);
        assert!(battery.operations.readable());
        assert!(!battery.operations.writable());

        assert!(device.resource(4).unwrap().operations.executable());
        assert!(device.resource(11).unwrap().multiple);
        assert!(device.resource(8).is_none());
    }

    #[test]
    fn test_ipso_sensor_schema() {
        let temp = ObjectSchema::temperature();
        let value = temp.resource(ipso::SENSOR_VALUE).unwrap();
        assert_eq!(value.units.as_deref(), Some("Cel"));
        assert_eq!(ObjectSchema::humidity().id, object_id::HUMIDITY);
    }
}
