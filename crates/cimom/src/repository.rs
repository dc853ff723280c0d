//! In-memory repository: schema store plus default instance provider.
//!
//! Instances are held in their compact descriptor form, so every operation
//! that flows through here exercises the same encoding the providers use.
//! Not a persistence layer; contents live and die with the process.

use std::collections::HashMap;

use cimom_dispatch::{
    OperationContext, OperationRequest, OperationResult, Repository, ResponsePayload,
};
use cimom_error::CimError;
use cimom_scmo::{PropertyGet, ScmoInstance, SetPropertyError};
use cimom_types::{CimClass, CimName, CimObjectPath, CimQualifier, CimType, Namespace};
use parking_lot::RwLock;

use crate::ClassCache;

/// Schema and instance store for one namespace.
pub struct MemoryRepository {
    namespace: Namespace,
    classes: RwLock<HashMap<CimName, CimClass>>,
    qualifiers: RwLock<HashMap<CimName, CimQualifier>>,
    instances: RwLock<Vec<ScmoInstance>>,
    cache: ClassCache,
}

impl MemoryRepository {
    #[must_use]
    pub fn new(namespace: impl Into<Namespace>) -> Self {
        Self {
            namespace: namespace.into(),
            classes: RwLock::new(HashMap::new()),
            qualifiers: RwLock::new(HashMap::new()),
            instances: RwLock::new(Vec::new()),
            cache: ClassCache::new(),
        }
    }

    /// Register a class definition.
    pub fn add_class(&self, class: CimClass) {
        self.classes.write().insert(class.class_name.clone(), class);
    }

    /// Register a qualifier declaration.
    pub fn add_qualifier(&self, qualifier: CimQualifier) {
        self.qualifiers
            .write()
            .insert(qualifier.name.clone(), qualifier);
    }

    /// Number of stored instances.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    fn direct_subclasses(&self, class_name: &CimName) -> Vec<CimName> {
        self.classes
            .read()
            .values()
            .filter(|c| &c.super_class == class_name)
            .map(|c| c.class_name.clone())
            .collect()
    }

    /// The class and its whole subclass closure.
    fn class_closure(&self, class_name: &CimName) -> Vec<CimName> {
        let mut out = vec![class_name.clone()];
        let mut i = 0;
        while i < out.len() {
            let children = self.direct_subclasses(&out[i]);
            out.extend(children);
            i += 1;
        }
        out
    }

    /// The class and its ancestors, walking `super_class` links.
    fn superclass_chain(&self, class_name: &CimName) -> Vec<CimName> {
        let classes = self.classes.read();
        let mut out = vec![class_name.clone()];
        let mut cur = class_name.clone();
        while let Some(c) = classes.get(&cur) {
            if c.super_class.is_empty() || out.contains(&c.super_class) {
                break;
            }
            out.push(c.super_class.clone());
            cur = c.super_class.clone();
        }
        out
    }

    fn find_instance(&self, path: &CimObjectPath) -> Option<usize> {
        self.instances
            .read()
            .iter()
            .position(|i| &i.object_path() == path)
    }

    fn get_instance(
        &self,
        path: &CimObjectPath,
        property_list: Option<&[String]>,
    ) -> Result<ResponsePayload, CimError> {
        let instances = self.instances.read();
        let inst = instances
            .iter()
            .find(|i| &i.object_path() == path)
            .ok_or_else(|| CimError::NotFound {
                detail: format!("instance '{path}'"),
            })?;
        let mut inst = inst.clone();
        drop(instances);
        if let Some(names) = property_list {
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            inst.set_property_filter(Some(&refs));
        }
        Ok(ResponsePayload::Instance {
            instance: inst.to_cim_instance(),
        })
    }

    fn create_instance(&self, source: &cimom_types::CimInstance) -> Result<ResponsePayload, CimError> {
        let class = {
            let classes = self.classes.read();
            classes
                .get(&source.class_name)
                .cloned()
                .ok_or_else(|| CimError::InvalidClass {
                    namespace: self.namespace.as_str().to_owned(),
                    class_name: source.class_name.as_str().to_owned(),
                })?
        };
        let shared = self.cache.get_or_build(&self.namespace, &class);
        let mut inst = ScmoInstance::from_instance(shared, source)
            .map_err(|e| CimError::failed(e.to_string()))?;
        inst.build_key_bindings_from_properties();
        let path = inst.object_path();
        if self.find_instance(&path).is_some() {
            return Err(CimError::AlreadyExists {
                detail: format!("instance '{path}'"),
            });
        }
        self.instances.write().push(inst);
        Ok(ResponsePayload::Path { path })
    }

    fn modify_instance(
        &self,
        source: &cimom_types::CimInstance,
        property_list: Option<&[String]>,
    ) -> Result<ResponsePayload, CimError> {
        let path = source.path.as_ref().ok_or_else(|| CimError::InvalidParameter {
            detail: "ModifyInstance requires the instance path".to_owned(),
        })?;
        let index = self.find_instance(path).ok_or_else(|| CimError::NotFound {
            detail: format!("instance '{path}'"),
        })?;
        let mut instances = self.instances.write();
        let target = &mut instances[index];
        for prop in &source.properties {
            if let Some(list) = property_list {
                if !list.iter().any(|n| prop.name.equals_ignore_case(n)) {
                    continue;
                }
            }
            let outcome = match &prop.value {
                Some(value) => target.set_property(prop.name.as_str(), value),
                None => target.clear_property(prop.name.as_str()),
            };
            outcome.map_err(|e| set_property_error(prop.name.as_str(), e))?;
        }
        Ok(ResponsePayload::Done)
    }

    fn delete_instance(&self, path: &CimObjectPath) -> Result<ResponsePayload, CimError> {
        let index = self.find_instance(path).ok_or_else(|| CimError::NotFound {
            detail: format!("instance '{path}'"),
        })?;
        self.instances.write().remove(index);
        Ok(ResponsePayload::Done)
    }

    fn enumerate(&self, class_name: &CimName, names_only: bool) -> ResponsePayload {
        let closure = self.class_closure(class_name);
        let instances = self.instances.read();
        let matching = instances
            .iter()
            .filter(|i| closure.iter().any(|c| c.equals_ignore_case(i.class_name())));
        if names_only {
            ResponsePayload::Paths {
                paths: matching.map(ScmoInstance::object_path).collect(),
            }
        } else {
            ResponsePayload::Instances {
                instances: matching.map(ScmoInstance::to_cim_instance).collect(),
            }
        }
    }

    fn get_property(
        &self,
        path: &CimObjectPath,
        name: &CimName,
    ) -> Result<ResponsePayload, CimError> {
        let instances = self.instances.read();
        let inst = instances
            .iter()
            .find(|i| &i.object_path() == path)
            .ok_or_else(|| CimError::NotFound {
                detail: format!("instance '{path}'"),
            })?;
        match inst.get_property(name.as_str()) {
            PropertyGet::Value { value, .. } => Ok(ResponsePayload::Value { value: Some(value) }),
            PropertyGet::Null { .. } => Ok(ResponsePayload::Value { value: None }),
            PropertyGet::NotFound => Err(CimError::NoSuchProperty {
                property: name.as_str().to_owned(),
            }),
        }
    }

    fn set_property(
        &self,
        path: &CimObjectPath,
        name: &CimName,
        value: Option<&cimom_types::CimValue>,
    ) -> Result<ResponsePayload, CimError> {
        let index = self.find_instance(path).ok_or_else(|| CimError::NotFound {
            detail: format!("instance '{path}'"),
        })?;
        let mut instances = self.instances.write();
        let target = &mut instances[index];
        let outcome = match value {
            Some(v) => target.set_property(name.as_str(), v),
            None => target.clear_property(name.as_str()),
        };
        outcome.map_err(|e| set_property_error(name.as_str(), e))?;
        Ok(ResponsePayload::Done)
    }
}

fn set_property_error(property: &str, e: SetPropertyError) -> CimError {
    match e {
        SetPropertyError::NotFound => CimError::NoSuchProperty {
            property: property.to_owned(),
        },
        SetPropertyError::WrongType => CimError::TypeMismatch {
            expected: "the declared property type".to_owned(),
            actual: "an incompatible value".to_owned(),
        },
        SetPropertyError::IsArray => CimError::TypeMismatch {
            expected: "a scalar value".to_owned(),
            actual: "an array".to_owned(),
        },
        SetPropertyError::NotAnArray => CimError::TypeMismatch {
            expected: "an array value".to_owned(),
            actual: "a scalar".to_owned(),
        },
    }
}

impl Repository for MemoryRepository {
    fn namespace_exists(&self, namespace: &Namespace) -> bool {
        *namespace == self.namespace
    }

    fn get_class(&self, namespace: &Namespace, class_name: &CimName) -> Option<CimClass> {
        if *namespace != self.namespace {
            return None;
        }
        self.classes.read().get(class_name).cloned()
    }

    fn subclass_names(
        &self,
        _namespace: &Namespace,
        class_name: &CimName,
        deep: bool,
    ) -> Vec<CimName> {
        if deep {
            let mut closure = self.class_closure(class_name);
            closure.remove(0);
            closure
        } else {
            self.direct_subclasses(class_name)
        }
    }

    fn association_class_names(
        &self,
        _namespace: &Namespace,
        class_name: &CimName,
    ) -> Vec<CimName> {
        let targets = self.superclass_chain(class_name);
        self.classes
            .read()
            .values()
            .filter(|c| {
                c.properties.iter().any(|p| {
                    p.cim_type == CimType::Reference
                        && targets.iter().any(|t| t == &p.reference_class)
                })
            })
            .map(|c| c.class_name.clone())
            .collect()
    }

    fn enumerate_classes(
        &self,
        _namespace: &Namespace,
        superclass: Option<&CimName>,
        deep: bool,
    ) -> Vec<CimClass> {
        let classes = self.classes.read();
        match superclass {
            None if deep => classes.values().cloned().collect(),
            None => classes
                .values()
                .filter(|c| c.super_class.is_empty())
                .cloned()
                .collect(),
            Some(parent) => {
                let wanted = if deep {
                    let mut closure = self.class_closure(parent);
                    closure.remove(0);
                    closure
                } else {
                    self.direct_subclasses(parent)
                };
                wanted
                    .iter()
                    .filter_map(|n| classes.get(n).cloned())
                    .collect()
            }
        }
    }

    fn get_qualifier(&self, _namespace: &Namespace, name: &CimName) -> Option<CimQualifier> {
        self.qualifiers.read().get(name).cloned()
    }

    fn enumerate_qualifiers(&self, _namespace: &Namespace) -> Vec<CimQualifier> {
        self.qualifiers.read().values().cloned().collect()
    }

    fn handle(&self, _context: &OperationContext, request: &OperationRequest) -> OperationResult {
        let outcome = match request {
            OperationRequest::GetInstance {
                path,
                property_list,
            } => self.get_instance(path, property_list.as_deref()),
            OperationRequest::CreateInstance { instance } => self.create_instance(instance),
            OperationRequest::ModifyInstance {
                instance,
                property_list,
            } => self.modify_instance(instance, property_list.as_deref()),
            OperationRequest::DeleteInstance { path } => self.delete_instance(path),
            OperationRequest::EnumerateInstances { class_name, .. } => {
                Ok(self.enumerate(class_name, false))
            }
            OperationRequest::EnumerateInstanceNames { class_name } => {
                Ok(self.enumerate(class_name, true))
            }
            OperationRequest::GetProperty { path, name } => self.get_property(path, name),
            OperationRequest::SetProperty { path, name, value } => {
                self.set_property(path, name, value.as_ref())
            }
            other => Err(CimError::not_supported(other.op_name())),
        };
        match outcome {
            Ok(payload) => OperationResult::Ok { payload },
            Err(err) => OperationResult::error(err.status_code(), err.to_string()),
        }
    }
}
