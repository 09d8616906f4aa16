//! LwM2M resource model
//!
//! The resource model stores object instances and their resource values,
//! validating every write against the object's schema. Mutations are
//! journaled so the engine can report them to the observation manager
//! before the write call that caused them returns to its caller.

use std::collections::BTreeMap;

use crate::config::ClientConfig;
use crate::error::{Lwm2mError, Result};
use crate::path::Path;
use crate::schema::{ObjectSchema, ResourceDef, ipso, object_id};
use crate::value::{Value, ValueKind, unix_time_now};

/// Stored value of one resource
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceValue {
    Single(Value),
    /// Multiple-instance resource keyed by resource instance ID
    Multiple(BTreeMap<u16, Value>),
}

impl ResourceValue {
    /// Kind of the first value that differs from `kind`, if any
    fn first_mismatch(&self, kind: ValueKind) -> Option<ValueKind> {
        match self {
            Self::Single(value) => (value.kind() != kind).then(|| value.kind()),
            Self::Multiple(values) => values.values().map(Value::kind).find(|k| *k != kind),
        }
    }
}

impl From<Value> for ResourceValue {
    fn from(value: Value) -> Self {
        Self::Single(value)
    }
}

/// Resources of one object instance
pub type Resources = BTreeMap<u16, ResourceValue>;

/// Result of a network read
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// Single resource or one resource instance
    Value(Value),
    /// Multiple-instance resource
    Multiple(BTreeMap<u16, Value>),
    /// Readable resources of an object instance
    Instance(Resources),
    /// Readable resources of every instance of an object
    Object(BTreeMap<u16, Resources>),
}

/// Who is performing a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    /// Remote server: operation mode is enforced
    Network,
    /// Local producer: operation mode is ignored
    Internal,
}

#[derive(Debug, Clone)]
struct ObjectEntry {
    schema: ObjectSchema,
    instances: BTreeMap<u16, Resources>,
}

/// Typed tree of objects, instances and resources
#[derive(Debug, Clone, Default)]
pub struct ResourceModel {
    objects: BTreeMap<u16, ObjectEntry>,
    /// Resource paths written since the last `take_changes`
    changes: Vec<Path>,
    /// Resources executed since the last `take_executions`
    executions: Vec<Path>,
    /// Registered object/instance list changed
    objects_changed: bool,
}

impl ResourceModel {
    /// Create an empty model
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the mandatory Security, Server and Device objects from configuration
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut model = Self::new();
        model.register_schema(ObjectSchema::security())?;
        model.register_schema(ObjectSchema::server())?;
        model.register_schema(ObjectSchema::device())?;

        model.create_instance(
            object_id::SECURITY,
            0,
            resources([
                (0, Value::String(config.server_uri.clone())),
                (1, Value::Boolean(false)),
                // 3 = NoSec
                (2, Value::Integer(3)),
                (10, Value::Integer(i64::from(config.short_server_id))),
            ]),
        )?;

        model.create_instance(
            object_id::SERVER,
            0,
            resources([
                (0, Value::Integer(i64::from(config.short_server_id))),
                (1, Value::Integer(i64::from(config.lifetime_seconds))),
                (6, Value::Boolean(false)),
                (7, Value::String(config.binding_mode.clone())),
            ]),
        )?;

        let device = &config.device;
        let mut device_resources = resources([
            (0, Value::String(device.manufacturer.clone())),
            (1, Value::String(device.model_number.clone())),
            (2, Value::String(device.serial_number.clone())),
            (3, Value::String(device.firmware_version.clone())),
            (9, Value::Integer(100)),
            (10, Value::Integer(512_000)),
            (13, Value::Time(unix_time_now())),
            (16, Value::String(config.binding_mode.clone())),
        ]);
        device_resources.insert(
            11,
            ResourceValue::Multiple(BTreeMap::from([(0, Value::Integer(0))])),
        );
        model.create_instance(object_id::DEVICE, 0, device_resources)?;

        model.take_objects_changed();
        Ok(model)
    }

    /// Add Connectivity Monitoring, Location and the IPSO temperature and
    /// humidity sensors with their initial readings
    pub fn with_sensor_objects(mut self) -> Result<Self> {
        self.register_schema(ObjectSchema::connectivity_monitoring())?;
        let mut connectivity = resources([
            // 41 = Ethernet
            (0, Value::Integer(41)),
            (2, Value::Integer(-45)),
            (8, Value::Integer(6)),
            (9, Value::Integer(0)),
            (10, Value::Integer(0)),
            (11, Value::Integer(95)),
            (12, Value::Integer(1)),
        ]);
        connectivity.insert(
            1,
            ResourceValue::Multiple(BTreeMap::from([(0, Value::Integer(41))])),
        );
        connectivity.insert(
            4,
            ResourceValue::Multiple(BTreeMap::from([(0, Value::from("0.0.0.0"))])),
        );
        self.create_instance(object_id::CONNECTIVITY_MONITORING, 0, connectivity)?;

        self.register_schema(ObjectSchema::location())?;
        self.create_instance(
            object_id::LOCATION,
            0,
            resources([
                (0, Value::Float(40.4168)),
                (1, Value::Float(-3.7038)),
                (2, Value::Float(650.0)),
                (3, Value::Float(10.0)),
                (5, Value::Time(unix_time_now())),
                (6, Value::Float(0.0)),
            ]),
        )?;

        for (schema, value, units, min_range, max_range, app) in [
            (ObjectSchema::temperature(), 22.0, "Cel", -40.0, 85.0, "Temperature Sensor"),
            (ObjectSchema::humidity(), 45.0, "%RH", 0.0, 100.0, "Humidity Sensor"),
        ] {
            let id = schema.id;
            self.register_schema(schema)?;
            self.create_instance(
                id,
                0,
                resources([
                    (ipso::SENSOR_VALUE, Value::Float(value)),
                    (ipso::SENSOR_UNITS, Value::from(units)),
                    (ipso::MIN_MEASURED, Value::Float(value)),
                    (ipso::MAX_MEASURED, Value::Float(value)),
                    (ipso::MIN_RANGE, Value::Float(min_range)),
                    (ipso::MAX_RANGE, Value::Float(max_range)),
                    (ipso::APPLICATION_TYPE, Value::from(app)),
                ]),
            )?;
        }

        self.take_objects_changed();
        Ok(self)
    }

    /// Register a new object type
    pub fn register_schema(&mut self, schema: ObjectSchema) -> Result<()> {
        if self.objects.contains_key(&schema.id) {
            return Err(Lwm2mError::AlreadyExists(Path::object(schema.id)));
        }
        self.objects.insert(
            schema.id,
            ObjectEntry {
                schema,
                instances: BTreeMap::new(),
            },
        );
        self.objects_changed = true;
        Ok(())
    }

    /// Remove an object type and all of its instances
    pub fn remove_object(&mut self, object: u16) -> Result<()> {
        self.objects
            .remove(&object)
            .ok_or(Lwm2mError::ResourceNotFound(Path::object(object)))?;
        self.objects_changed = true;
        Ok(())
    }

    /// Create an object instance with initial resource values
    pub fn create_instance(&mut self, object: u16, instance: u16, values: Resources) -> Result<()> {
        let path = Path::instance(object, instance);
        let entry = self
            .objects
            .get_mut(&object)
            .ok_or(Lwm2mError::ResourceNotFound(Path::object(object)))?;

        if entry.instances.contains_key(&instance)
            || (!entry.schema.multiple_instances && !entry.instances.is_empty())
        {
            return Err(Lwm2mError::AlreadyExists(path));
        }

        for (id, value) in &values {
            let resource_path = Path::resource(object, instance, *id);
            let def = entry
                .schema
                .resource(*id)
                .ok_or(Lwm2mError::ResourceNotFound(resource_path))?;
            check_shape(def, value, resource_path)?;
        }

        entry.instances.insert(instance, values);
        self.objects_changed = true;
        Ok(())
    }

    /// Delete an object instance
    pub fn remove_instance(&mut self, object: u16, instance: u16) -> Result<()> {
        self.objects
            .get_mut(&object)
            .and_then(|entry| entry.instances.remove(&instance))
            .ok_or(Lwm2mError::ResourceNotFound(Path::instance(object, instance)))?;
        self.objects_changed = true;
        Ok(())
    }

    /// Registered Object IDs in ascending order
    pub fn list_objects(&self) -> Vec<u16> {
        self.objects.keys().copied().collect()
    }

    /// Instance IDs of an object in ascending order
    pub fn instance_ids(&self, object: u16) -> Vec<u16> {
        self.objects
            .get(&object)
            .map(|entry| entry.instances.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Schema of a registered object
    pub fn schema_for(&self, object: u16) -> Option<&ObjectSchema> {
        self.objects.get(&object).map(|entry| &entry.schema)
    }

    /// Resource definition addressed by a resource path
    pub fn resource_def(&self, path: &Path) -> Result<&ResourceDef> {
        let resource = path
            .resource
            .ok_or_else(|| Lwm2mError::InvalidPath(path.to_string()))?;
        let entry = self
            .objects
            .get(&path.object)
            .ok_or(Lwm2mError::ResourceNotFound(*path))?;
        if path
            .instance
            .is_some_and(|instance| !entry.instances.contains_key(&instance))
        {
            return Err(Lwm2mError::ResourceNotFound(*path));
        }
        entry
            .schema
            .resource(resource)
            .ok_or(Lwm2mError::ResourceNotFound(*path))
    }

    /// Current value of a single resource or resource instance
    ///
    /// Ignores the operation mode; this is the local view of the data.
    pub fn get(&self, path: &Path) -> Result<Value> {
        match (self.stored(path)?, path.resource_instance) {
            (ResourceValue::Single(value), None) => Ok(value.clone()),
            (ResourceValue::Multiple(values), Some(ri)) => values
                .get(&ri)
                .cloned()
                .ok_or(Lwm2mError::ResourceNotFound(*path)),
            (ResourceValue::Multiple(_), None) => Err(Lwm2mError::InvalidPath(format!(
                "{} is a multiple-instance resource",
                path
            ))),
            (ResourceValue::Single(_), Some(_)) => Err(Lwm2mError::ResourceNotFound(*path)),
        }
    }

    /// Network read of a resource, instance or object
    ///
    /// Resources without read access are left out of instance and object
    /// reads and rejected when addressed directly.
    pub fn read(&self, path: &Path) -> Result<Content> {
        let entry = self
            .objects
            .get(&path.object)
            .ok_or(Lwm2mError::ResourceNotFound(*path))?;

        let Some(instance_id) = path.instance else {
            let instances = entry
                .instances
                .iter()
                .map(|(id, resources)| (*id, readable(&entry.schema, resources)))
                .collect();
            return Ok(Content::Object(instances));
        };

        let resources = entry
            .instances
            .get(&instance_id)
            .ok_or(Lwm2mError::ResourceNotFound(*path))?;

        let Some(resource_id) = path.resource else {
            return Ok(Content::Instance(readable(&entry.schema, resources)));
        };

        let def = entry
            .schema
            .resource(resource_id)
            .ok_or(Lwm2mError::ResourceNotFound(*path))?;
        if !def.operations.readable() {
            return Err(Lwm2mError::NotReadable(*path));
        }

        match (resources.get(&resource_id), path.resource_instance) {
            (Some(ResourceValue::Single(value)), None) => Ok(Content::Value(value.clone())),
            (Some(ResourceValue::Multiple(values)), None) => Ok(Content::Multiple(values.clone())),
            (Some(ResourceValue::Multiple(values)), Some(ri)) => values
                .get(&ri)
                .cloned()
                .map(Content::Value)
                .ok_or(Lwm2mError::ResourceNotFound(*path)),
            _ => Err(Lwm2mError::ResourceNotFound(*path)),
        }
    }

    /// Network write of a single value
    ///
    /// Fails with `ReadOnly` when the resource lacks write access and with
    /// `TypeMismatch` when the value kind differs from the schema.
    pub fn set(&mut self, path: &Path, value: Value) -> Result<()> {
        self.store(path, value, Access::Network)
    }

    /// Producer write of a single value; the operation mode is not enforced
    pub fn set_internal(&mut self, path: &Path, value: Value) -> Result<()> {
        self.store(path, value, Access::Internal)
    }

    /// Network write of a whole resource (single or multiple-instance)
    pub fn set_resource(&mut self, path: &Path, value: ResourceValue) -> Result<()> {
        if path.resource_instance.is_some() {
            return Err(Lwm2mError::InvalidPath(path.to_string()));
        }
        let def = self.resource_def(path)?;
        if !def.operations.writable() {
            return Err(Lwm2mError::ReadOnly(*path));
        }
        check_shape(def, &value, *path)?;

        let resource_id = def.id;
        self.instance_mut(path)?.insert(resource_id, value);
        self.record_change(*path);
        Ok(())
    }

    /// Write several resources of one instance
    ///
    /// Each resource is written independently; the outcome is reported per
    /// resource and earlier successes are kept when a later one fails.
    pub fn write_batch(&mut self, instance: &Path, values: Resources) -> Vec<(Path, Result<()>)> {
        let (Some(instance_id), None) = (instance.instance, instance.resource) else {
            return vec![(*instance, Err(Lwm2mError::InvalidPath(instance.to_string())))];
        };

        values
            .into_iter()
            .map(|(id, value)| {
                let path = Path::resource(instance.object, instance_id, id);
                (path, self.set_resource(&path, value))
            })
            .collect()
    }

    /// Execute a resource
    pub fn execute(&mut self, path: &Path) -> Result<()> {
        if !path.is_resource() {
            return Err(Lwm2mError::NotExecutable(*path));
        }
        let def = self.resource_def(path)?;
        if !def.operations.executable() {
            return Err(Lwm2mError::NotExecutable(*path));
        }

        if path.resource == Some(ipso::RESET_MIN_MAX) {
            self.reset_min_max(*path);
        }
        self.executions.push(*path);
        Ok(())
    }

    /// Links advertised at registration: `</O/I>` per instance, `</O>` for
    /// objects without instances. The Security object is never advertised.
    pub fn links(&self) -> Vec<Path> {
        let mut links = Vec::new();
        for (id, entry) in &self.objects {
            if *id == object_id::SECURITY {
                continue;
            }
            if entry.instances.is_empty() {
                links.push(Path::object(*id));
            } else {
                links.extend(entry.instances.keys().map(|i| Path::instance(*id, *i)));
            }
        }
        links
    }

    /// Paths listed by a Discover on `path`
    pub fn discover(&self, path: &Path) -> Result<Vec<Path>> {
        let entry = self
            .objects
            .get(&path.object)
            .ok_or(Lwm2mError::ResourceNotFound(*path))?;

        let mut out = Vec::new();
        match (path.instance, path.resource) {
            (None, _) => {
                out.push(*path);
                for (instance, resources) in &entry.instances {
                    out.push(Path::instance(path.object, *instance));
                    out.extend(
                        resources
                            .keys()
                            .map(|r| Path::resource(path.object, *instance, *r)),
                    );
                }
            }
            (Some(instance), None) => {
                let resources = entry
                    .instances
                    .get(&instance)
                    .ok_or(Lwm2mError::ResourceNotFound(*path))?;
                out.push(*path);
                out.extend(
                    resources
                        .keys()
                        .map(|r| Path::resource(path.object, instance, *r)),
                );
            }
            (Some(_), Some(_)) => {
                self.resource_def(path)?;
                out.push(path.without_resource_instance());
            }
        }
        Ok(out)
    }

    /// Verify every mandatory object has at least one instance
    pub fn check_mandatory(&self) -> Result<()> {
        for mandatory in [object_id::SECURITY, object_id::SERVER, object_id::DEVICE] {
            match self.objects.get(&mandatory) {
                Some(entry) if !entry.instances.is_empty() => {}
                _ => return Err(Lwm2mError::MissingMandatoryObject(mandatory)),
            }
        }
        for (id, entry) in &self.objects {
            if entry.schema.mandatory && entry.instances.is_empty() {
                return Err(Lwm2mError::MissingMandatoryObject(*id));
            }
        }
        Ok(())
    }

    /// Drain the journal of written resource paths
    pub fn take_changes(&mut self) -> Vec<Path> {
        std::mem::take(&mut self.changes)
    }

    /// Drain the journal of executed resources
    pub fn take_executions(&mut self) -> Vec<Path> {
        std::mem::take(&mut self.executions)
    }

    /// Returns true once after the object/instance list changed
    pub fn take_objects_changed(&mut self) -> bool {
        std::mem::take(&mut self.objects_changed)
    }

    fn stored(&self, path: &Path) -> Result<&ResourceValue> {
        let resource = path
            .resource
            .ok_or_else(|| Lwm2mError::InvalidPath(path.to_string()))?;
        self.objects
            .get(&path.object)
            .and_then(|entry| entry.instances.get(&path.instance?))
            .and_then(|resources| resources.get(&resource))
            .ok_or(Lwm2mError::ResourceNotFound(*path))
    }

    fn instance_mut(&mut self, path: &Path) -> Result<&mut Resources> {
        let instance = path
            .instance
            .ok_or_else(|| Lwm2mError::InvalidPath(path.to_string()))?;
        self.objects
            .get_mut(&path.object)
            .and_then(|entry| entry.instances.get_mut(&instance))
            .ok_or(Lwm2mError::ResourceNotFound(*path))
    }

    fn store(&mut self, path: &Path, value: Value, access: Access) -> Result<()> {
        let def = self.resource_def(path)?;
        if access == Access::Network && !def.operations.writable() {
            return Err(Lwm2mError::ReadOnly(*path));
        }
        if def.kind != value.kind() {
            return Err(Lwm2mError::TypeMismatch {
                path: *path,
                expected: def.kind,
                actual: value.kind(),
            });
        }
        let (resource_id, multiple) = (def.id, def.multiple);

        let resources = self.instance_mut(path)?;
        match (path.resource_instance, multiple) {
            (None, false) => {
                resources.insert(resource_id, ResourceValue::Single(value));
            }
            (Some(ri), true) => {
                let slot = resources
                    .entry(resource_id)
                    .or_insert_with(|| ResourceValue::Multiple(BTreeMap::new()));
                if let ResourceValue::Multiple(values) = slot {
                    values.insert(ri, value);
                } else {
                    *slot = ResourceValue::Multiple(BTreeMap::from([(ri, value)]));
                }
            }
            (None, true) => {
                return Err(Lwm2mError::Decode(format!(
                    "{} is a multiple-instance resource",
                    path
                )));
            }
            (Some(_), false) => return Err(Lwm2mError::ResourceNotFound(*path)),
        }

        self.record_change(path.without_resource_instance());
        Ok(())
    }

    fn record_change(&mut self, path: Path) {
        self.changes.push(path);
        if path.resource == Some(ipso::SENSOR_VALUE) {
            self.track_min_max(path);
        }
    }

    /// Fold a new IPSO sensor value into Min/Max Measured Value
    fn track_min_max(&mut self, path: Path) {
        let Some(instance) = path.instance else {
            return;
        };
        let Some(entry) = self.objects.get_mut(&path.object) else {
            return;
        };
        if entry.schema.resource(ipso::MIN_MEASURED).is_none() {
            return;
        }
        let Some(resources) = entry.instances.get_mut(&instance) else {
            return;
        };
        let Some(ResourceValue::Single(Value::Float(current))) =
            resources.get(&ipso::SENSOR_VALUE).cloned()
        else {
            return;
        };

        for id in [ipso::MIN_MEASURED, ipso::MAX_MEASURED] {
            let replace = match resources.get(&id) {
                Some(ResourceValue::Single(Value::Float(old))) if id == ipso::MIN_MEASURED => {
                    current < *old
                }
                Some(ResourceValue::Single(Value::Float(old))) => current > *old,
                _ => true,
            };
            if replace {
                resources.insert(id, ResourceValue::Single(Value::Float(current)));
                self.changes.push(Path::resource(path.object, instance, id));
            }
        }
    }

    fn reset_min_max(&mut self, path: Path) {
        let Ok(Value::Float(current)) = self.get(&Path {
            resource: Some(ipso::SENSOR_VALUE),
            ..path
        }) else {
            return;
        };
        let Ok(resources) = self.instance_mut(&path) else {
            return;
        };
        for id in [ipso::MIN_MEASURED, ipso::MAX_MEASURED] {
            resources.insert(id, ResourceValue::Single(Value::Float(current)));
        }
        if let Some(instance) = path.instance {
            for id in [ipso::MIN_MEASURED, ipso::MAX_MEASURED] {
                self.changes.push(Path::resource(path.object, instance, id));
            }
        }
    }
}

/// Build instance resources from single values
pub fn resources<const N: usize>(values: [(u16, Value); N]) -> Resources {
    values
        .into_iter()
        .map(|(id, value)| (id, ResourceValue::Single(value)))
        .collect()
}

fn check_shape(def: &ResourceDef, value: &ResourceValue, path: Path) -> Result<()> {
    match (def.multiple, value) {
        (true, ResourceValue::Single(_)) => {
            return Err(Lwm2mError::Decode(format!(
                "{} is a multiple-instance resource",
                path
            )));
        }
        (false, ResourceValue::Multiple(_)) => {
            return Err(Lwm2mError::Decode(format!(
                "{} is a single-instance resource",
                path
            )));
        }
        _ => {}
    }
    match value.first_mismatch(def.kind) {
        Some(actual) => Err(Lwm2mError::TypeMismatch {
            path,
            expected: def.kind,
            actual,
        }),
        None => Ok(()),
    }
}

fn readable(schema: &ObjectSchema, resources: &Resources) -> Resources {
    resources
        .iter()
        .filter(|(id, _)| {
            schema
                .resource(**id)
                .is_some_and(|def| def.operations.readable())
        })
        .map(|(id, value)| (*id, value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ResourceModel {
        let config = ClientConfig::for_server("coap://127.0.0.1:5683", "dev-01");
        ResourceModel::from_config(&config)
            .unwrap()
            .with_sensor_objects()
            .unwrap()
    }

    #[test]
    fn test_internal_write_ignores_mode() {
        let mut model = model();
        let battery = Path::resource(3, 0, 9);

        model.set_internal(&battery, Value::Integer(87)).unwrap();
        assert_eq!(model.get(&battery).unwrap(), Value::Integer(87));
        assert_eq!(model.take_changes(), vec![battery]);
    }

    #[test]
    fn test_network_write_enforces_mode() {
        let mut model = model();
        let battery = Path::resource(3, 0, 9);

        let err = model.set(&battery, Value::Integer(5)).unwrap_err();
        assert!(matches!(err, Lwm2mError::ReadOnly(_)));
        assert_eq!(model.get(&battery).unwrap(), Value::Integer(100));
        assert!(model.take_changes().is_empty());
    }

    #[test]
    fn test_type_mismatch_does_not_mutate() {
        let mut model = model();
        let timezone = Path::resource(3, 0, 15);
        model.set(&timezone, Value::from("Europe/Madrid")).unwrap();

        let err = model.set(&timezone, Value::Integer(1)).unwrap_err();
        assert!(matches!(
            err,
            Lwm2mError::TypeMismatch {
                expected: ValueKind::String,
                actual: ValueKind::Integer,
                ..
            }
        ));
        assert_eq!(model.get(&timezone).unwrap(), Value::from("Europe/Madrid"));
    }

    #[test]
    fn test_unknown_paths() {
        let mut model = model();
        assert!(matches!(
            model.get(&Path::resource(3, 0, 8)),
            Err(Lwm2mError::ResourceNotFound(_))
        ));
        assert!(matches!(
            model.set_internal(&Path::resource(3, 1, 9), Value::Integer(1)),
            Err(Lwm2mError::ResourceNotFound(_))
        ));
        assert!(matches!(
            model.read(&Path::object(42)),
            Err(Lwm2mError::ResourceNotFound(_))
        ));
    }

    #[test]
    fn test_read_instance_skips_executables() {
        let model = model();
        let Content::Instance(resources) = model.read(&Path::instance(3, 0)).unwrap() else {
            panic!("expected instance content");
        };
        assert!(resources.contains_key(&9));
        assert!(!resources.contains_key(&4));
    }

    #[test]
    fn test_multiple_instance_resource() {
        let mut model = model();
        let error_code = Path::resource_instance(3, 0, 11, 1);
        model.set_internal(&error_code, Value::Integer(2)).unwrap();

        assert_eq!(model.get(&error_code).unwrap(), Value::Integer(2));
        let Content::Multiple(values) = model.read(&Path::resource(3, 0, 11)).unwrap() else {
            panic!("expected multiple content");
        };
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_sensor_min_max_tracking() {
        let mut model = model();
        let value = Path::resource(3303, 0, ipso::SENSOR_VALUE);
        let max = Path::resource(3303, 0, ipso::MAX_MEASURED);
        let min = Path::resource(3303, 0, ipso::MIN_MEASURED);

        model.set_internal(&value, Value::Float(30.5)).unwrap();
        model.set_internal(&value, Value::Float(12.0)).unwrap();
        assert_eq!(model.get(&max).unwrap(), Value::Float(30.5));
        assert_eq!(model.get(&min).unwrap(), Value::Float(12.0));

        model.execute(&Path::resource(3303, 0, ipso::RESET_MIN_MAX)).unwrap();
        assert_eq!(model.get(&max).unwrap(), Value::Float(12.0));
    }

    #[test]
    fn test_execute_requires_executable() {
        let mut model = model();
        model.execute(&Path::resource(3, 0, 4)).unwrap();
        assert_eq!(model.take_executions(), vec![Path::resource(3, 0, 4)]);
        assert!(matches!(
            model.execute(&Path::resource(3, 0, 9)),
            Err(Lwm2mError::NotExecutable(_))
        ));
    }

    #[test]
    fn test_batch_write_reports_each_resource() {
        let mut model = model();
        let results = model.write_batch(
            &Path::instance(3, 0),
            resources([
                (14, Value::from("+01:00")),
                (9, Value::Integer(3)),
                (15, Value::Integer(7)),
            ]),
        );

        assert_eq!(results.len(), 3);
        assert!(results[0].1.is_err()); // 9 is read-only
        assert!(results[1].1.is_ok()); // 14 written
        assert!(results[2].1.is_err()); // 15 wrong kind
        assert_eq!(model.get(&Path::resource(3, 0, 14)).unwrap(), Value::from("+01:00"));
    }

    #[test]
    fn test_links_and_object_changes() {
        let mut model = model();
        assert!(!model.take_objects_changed());
        let links: Vec<String> = model.links().iter().map(ToString::to_string).collect();
        assert_eq!(links[0], "/1/0");
        assert!(!links.contains(&"/0/0".to_string()));

        model.create_instance(3303, 1, Resources::new()).unwrap();
        assert!(model.take_objects_changed());
        assert!(model.links().contains(&Path::instance(3303, 1)));
        assert!(matches!(
            model.create_instance(3, 1, Resources::new()),
            Err(Lwm2mError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_check_mandatory() {
        let mut model = ResourceModel::new();
        model.register_schema(ObjectSchema::device()).unwrap();
        assert!(matches!(
            model.check_mandatory(),
            Err(Lwm2mError::MissingMandatoryObject(0))
        ));
        assert!(self::model().check_mandatory().is_ok());
    }
}
