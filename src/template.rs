use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// A CloudFormation resource type. Implementors describe their
/// properties as plain json so the template can stay untyped.
pub trait CfnResource {
    fn type_string(&self) -> &'static str;
    fn properties(&self) -> Value;
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(rename = "Properties")]
    pub properties: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Description", default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Value")]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub version: String,
    #[serde(rename = "Description", default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "Parameters", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, Resource>,
    #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            version: TEMPLATE_FORMAT_VERSION.to_string(),
            description: Default::default(),
            parameters: Default::default(),
            resources: Default::default(),
            outputs: Default::default(),
        }
    }
}

impl Template {
    pub fn new(description: &str) -> Self {
        Self {
            description: description.to_string(),
            ..Default::default()
        }
    }

    /// validates the resource, and inserts it under `logical_id`.
    /// logical ids must be unique within a template.
    pub fn add_resource(&mut self, logical_id: &str, resource: &dyn CfnResource) -> Result<()> {
        if let Some(err) = verify_logical_id(logical_id) {
            return Err(Error::InvalidTemplate(err));
        }
        if self.resources.contains_key(logical_id) || self.parameters.contains_key(logical_id) {
            return Err(Error::InvalidTemplate(format!("Duplicate logical id {logical_id:?}")));
        }
        if let Err(e) = resource.validate() {
            return Err(Error::InvalidTemplate(format!("Validation failed on resource '{logical_id}'\n{e}")));
        }
        self.resources.insert(logical_id.to_string(), Resource {
            ty: resource.type_string().to_string(),
            depends_on: vec![],
            properties: resource.properties(),
        });
        Ok(())
    }

    /// adds an explicit DependsOn edge for orderings that cannot be
    /// expressed through a Ref or GetAtt.
    pub fn add_dependency(&mut self, logical_id: &str, depends_on: &str) -> Result<()> {
        let resource = self.resources.get_mut(logical_id)
            .ok_or_else(|| Error::InvalidTemplate(format!("Cannot add dependency to unknown resource {logical_id:?}")))?;
        if !resource.depends_on.iter().any(|d| d == depends_on) {
            resource.depends_on.push(depends_on.to_string());
        }
        Ok(())
    }

    pub fn add_parameter(&mut self, name: &str, description: &str) -> Result<()> {
        if let Some(err) = verify_logical_id(name) {
            return Err(Error::InvalidTemplate(err));
        }
        if self.resources.contains_key(name) {
            return Err(Error::InvalidTemplate(format!("Duplicate logical id {name:?}")));
        }
        self.parameters.insert(name.to_string(), Parameter {
            ty: "String".to_string(),
            description: description.to_string(),
        });
        Ok(())
    }

    pub fn add_output(&mut self, name: &str, description: &str, value: Value) {
        self.outputs.insert(name.to_string(), Output {
            description: description.to_string(),
            value,
        });
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    pub fn resources_of_type<'a>(&'a self, ty: &'a str) -> impl Iterator<Item = (&'a String, &'a Resource)> + 'a {
        self.resources.iter().filter(move |(_, r)| r.ty == ty)
    }

    /// pretty printed, so the template reads well in the CloudFormation console.
    /// maps are sorted, so the same declaration always renders the same bytes.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// the logical ids a resource points at, through intrinsic functions
    /// or an explicit DependsOn. Pseudo parameters and template parameters
    /// are not included.
    pub fn references(&self, logical_id: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        if let Some(resource) = self.resources.get(logical_id) {
            collect_references(&resource.properties, &mut out);
            out.extend(resource.depends_on.iter().cloned());
        }
        out.retain(|r| !self.parameters.contains_key(r));
        out
    }

    /// every reference, including those in outputs, must name a declared
    /// resource, a parameter, or a pseudo parameter.
    pub fn check_references(&self) -> Result<()> {
        let mut dangling = vec![];
        for id in self.resources.keys() {
            for target in self.references(id) {
                if !self.resources.contains_key(&target) {
                    dangling.push(format!("{id} -> {target}"));
                }
            }
        }
        for (name, output) in self.outputs.iter() {
            let mut refs = BTreeSet::new();
            collect_references(&output.value, &mut refs);
            for target in refs {
                if !self.resources.contains_key(&target) && !self.parameters.contains_key(&target) {
                    dangling.push(format!("output {name} -> {target}"));
                }
            }
        }
        if dangling.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidTemplate(format!("Unresolved references: {}", dangling.join(", "))))
        }
    }

    /// an order in which CloudFormation could create the resources:
    /// every resource comes after the resources it references.
    /// ties are broken by logical id, so the result is stable.
    pub fn dependency_order(&self) -> Result<Vec<String>> {
        self.check_references()?;
        let mut remaining: BTreeMap<&str, BTreeSet<String>> = self.resources.keys()
            .map(|id| (id.as_str(), self.references(id)))
            .collect();
        let mut order = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let ready: Vec<&str> = remaining.iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(id, _)| *id)
                .collect();
            if ready.is_empty() {
                let stuck: Vec<&str> = remaining.keys().copied().collect();
                return Err(Error::InvalidTemplate(format!("Circular dependency between {}", stuck.join(", "))));
            }
            for id in ready {
                remaining.remove(id);
                for deps in remaining.values_mut() {
                    deps.remove(id);
                }
                order.push(id.to_string());
            }
        }
        Ok(order)
    }
}

/// `{ "Ref": logical_id }`
pub fn get_ref(logical_id: &str) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("Ref".to_string(), Value::String(logical_id.to_string()));
    Value::Object(map)
}

/// `{ "Fn::GetAtt": [logical_id, attribute] }`
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("Fn::GetAtt".to_string(), Value::Array(vec![
        Value::String(logical_id.to_string()),
        Value::String(attribute.to_string()),
    ]));
    Value::Object(map)
}

/// `{ "Fn::Sub": s }`
pub fn sub(s: &str) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("Fn::Sub".to_string(), Value::String(s.to_string()));
    Value::Object(map)
}

/// `{ "Fn::Select": [index, { "Fn::Split": [delimiter, value] }] }`
pub fn select_split(index: usize, delimiter: &str, value: Value) -> Value {
    let mut split = serde_json::Map::new();
    split.insert("Fn::Split".to_string(), Value::Array(vec![
        Value::String(delimiter.to_string()),
        value,
    ]));
    let mut map = serde_json::Map::new();
    map.insert("Fn::Select".to_string(), Value::Array(vec![
        Value::String(index.to_string()),
        Value::Object(split),
    ]));
    Value::Object(map)
}

pub fn verify_logical_id(logical_id: &str) -> Option<String> {
    if logical_id.len() > 255 {
        return Some(format!("Invalid logical id {:?}\nmust be less than 255 characters", logical_id));
    }
    if logical_id.is_empty() {
        return Some(format!("Invalid logical id {:?}\nMust contain at least 1 character", logical_id));
    }
    if !logical_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Some(format!("Invalid logical id {:?}\nMust contain only alphanumeric characters [A-Za-z0-9]", logical_id));
    }
    None
}

pub fn validate_stack_name(stack_name: &str) -> Option<String> {
    // A stack name can contain only alphanumeric characters (case sensitive) and hyphens.
    // It must start with an alphabetical character and can't be longer than 128 characters.
    let restriction = "Must only consist of alphanumeric characters and hyphens, Must start with an alphabetical character, and cannot be longer than 128 characters.";
    let starts_alphabetic = stack_name.chars().next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false);
    if !starts_alphabetic
        || stack_name.len() > 128
        || !stack_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Some(format!("Invalid stack name {:?}\n{}", stack_name, restriction));
    }
    None
}

fn insert_reference(target: &str, out: &mut BTreeSet<String>) {
    if !target.starts_with("AWS::") && !target.is_empty() {
        out.insert(target.to_string());
    }
}

/// names referenced by `${...}` in a Fn::Sub string. `${!Literal}` is an escape
/// and `${Name.Attr}` references `Name`.
fn sub_variables(s: &str) -> Vec<String> {
    let mut out = vec![];
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        rest = &rest[start + 2..];
        let end = match rest.find('}') {
            Some(e) => e,
            None => break,
        };
        let var = &rest[..end];
        rest = &rest[end + 1..];
        if var.starts_with('!') {
            continue;
        }
        let name = var.split('.').next().unwrap_or_default().trim();
        out.push(name.to_string());
    }
    out
}

fn collect_references(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(target)) = map.get("Ref") {
                    insert_reference(target, out);
                    return;
                }
                match map.get("Fn::GetAtt") {
                    Some(Value::Array(args)) => {
                        if let Some(Value::String(target)) = args.first() {
                            insert_reference(target, out);
                        }
                        return;
                    }
                    Some(Value::String(dotted)) => {
                        if let Some((target, _)) = dotted.split_once('.') {
                            insert_reference(target, out);
                        }
                        return;
                    }
                    _ => {}
                }
                match map.get("Fn::Sub") {
                    Some(Value::String(s)) => {
                        for var in sub_variables(s) {
                            insert_reference(&var, out);
                        }
                        return;
                    }
                    Some(Value::Array(args)) => {
                        // [template, { local: value }]: local names shadow resources
                        let locals = match args.get(1) {
                            Some(Value::Object(vars)) => {
                                for v in vars.values() {
                                    collect_references(v, out);
                                }
                                vars.keys().cloned().collect::<BTreeSet<String>>()
                            }
                            _ => BTreeSet::new(),
                        };
                        if let Some(Value::String(s)) = args.first() {
                            for var in sub_variables(s) {
                                if !locals.contains(&var) {
                                    insert_reference(&var, out);
                                }
                            }
                        }
                        return;
                    }
                    _ => {}
                }
            }
            for v in map.values() {
                collect_references(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_references(v, out);
            }
        }
        _ => {}
    }
}
