use std::collections::BTreeMap;

use super::*;

pub const BASIC_EXECUTION_POLICY_ARN: &str = "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

#[derive(Debug, Clone, PartialEq)]
pub enum LambdaCode {
    /// an archive uploaded ahead of the deployment. The key is usually a
    /// Ref to a template parameter so new code deploys without a template change.
    S3 { bucket: String, key: Value },
    /// source embedded in the template. interpreted runtimes only.
    ZipFile(String),
}

impl LambdaCode {
    fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        match self {
            LambdaCode::S3 { bucket, key } => {
                map.insert("S3Bucket".to_string(), Value::String(bucket.clone()));
                map.insert("S3Key".to_string(), key.clone());
            }
            LambdaCode::ZipFile(source) => {
                map.insert("ZipFile".to_string(), Value::String(source.clone()));
            }
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LambdaFunction {
    pub function_name: String,
    pub description: String,
    pub runtime: String,
    pub handler: String,
    pub architecture: String,
    /// in MB
    pub memory_size: u32,
    /// in seconds
    pub timeout: u32,
    pub code: LambdaCode,
    /// usually a GetAtt of a role declared in the same template
    pub role: Value,
    pub environment_variables: BTreeMap<String, Value>,
}

impl LambdaFunction {
    pub fn verify_function_name(function_name: &str) -> Option<String> {
        if function_name.is_empty() || function_name.len() > 64 {
            return Some(format!("Invalid function name {:?}\nMust be between 1 and 64 characters", function_name));
        }
        if !function_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Some(format!("Invalid function name {:?}\nMay only contain letters, numbers, hyphens, and underscores", function_name));
        }
        None
    }

    pub fn verify_limits(memory_size: u32, timeout: u32) -> Option<String> {
        if !(128..=10240).contains(&memory_size) {
            return Some(format!("Invalid memory size {:?}\nMust be between 128 and 10240", memory_size));
        }
        if !(1..=900).contains(&timeout) {
            return Some(format!("Invalid timeout {:?}\nMust be between 1 and 900", timeout));
        }
        None
    }

    /// returns `{ "Fn::GetAtt": [logical_id, "Arn"] }`
    pub fn arn_of(logical_id: &str) -> Value {
        get_att(logical_id, "Arn")
    }
}

impl CfnResource for LambdaFunction {
    fn type_string(&self) -> &'static str {
        "AWS::Lambda::Function"
    }
    fn properties(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("FunctionName".into(), Value::String(self.function_name.clone()));
        if !self.description.is_empty() {
            map.insert("Description".into(), Value::String(self.description.clone()));
        }
        map.insert("Runtime".into(), Value::String(self.runtime.clone()));
        map.insert("Handler".into(), Value::String(self.handler.clone()));
        map.insert("Architectures".into(), Value::Array(vec![Value::String(self.architecture.clone())]));
        map.insert("MemorySize".into(), Value::from(self.memory_size));
        map.insert("Timeout".into(), Value::from(self.timeout));
        map.insert("Code".into(), self.code.to_value());
        map.insert("Role".into(), self.role.clone());
        if !self.environment_variables.is_empty() {
            let vars: serde_json::Map<String, Value> = self.environment_variables.iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let mut env = serde_json::Map::new();
            env.insert("Variables".into(), Value::Object(vars));
            map.insert("Environment".into(), Value::Object(env));
        }
        Value::Object(map)
    }
    fn validate(&self) -> Result<(), String> {
        if let Some(err) = Self::verify_function_name(&self.function_name) { return Err(err) }
        if let Some(err) = Self::verify_limits(self.memory_size, self.timeout) { return Err(err) }
        if self.runtime.is_empty() || self.handler.is_empty() {
            return Err(format!("Function {:?} needs a runtime and handler", self.function_name));
        }
        if let LambdaCode::ZipFile(_) = self.code {
            if self.runtime.starts_with("provided") {
                return Err("Custom runtimes cannot use inline code. Upload an archive instead".into());
            }
        }
        for key in self.environment_variables.keys() {
            let starts_alpha = key.chars().next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false);
            if !starts_alpha || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(format!("Invalid environment variable name {key:?}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn function() -> LambdaFunction {
        LambdaFunction {
            function_name: "invalidateCacheLambda".into(),
            description: String::new(),
            runtime: "provided.al2023".into(),
            handler: "bootstrap".into(),
            architecture: "arm64".into(),
            memory_size: 128,
            timeout: 30,
            code: LambdaCode::S3 { bucket: "artifacts".into(), key: get_ref("CodeKey") },
            role: LambdaFunction::arn_of("Role"),
            environment_variables: BTreeMap::from([("DISTRIBUTION_ID".to_string(), get_ref("Dist"))]),
        }
    }

    #[test]
    fn renders_code_and_environment() {
        let f = function();
        f.validate().unwrap();
        let props = f.properties();
        assert_eq!(props["Code"], json!({ "S3Bucket": "artifacts", "S3Key": { "Ref": "CodeKey" } }));
        assert_eq!(props["Environment"], json!({ "Variables": { "DISTRIBUTION_ID": { "Ref": "Dist" } } }));
        assert_eq!(props["Role"], json!({ "Fn::GetAtt": ["Role", "Arn"] }));
        assert_eq!(props["Architectures"], json!(["arm64"]));
        assert_eq!(props["MemorySize"], json!(128));
    }

    #[test]
    fn limits_are_enforced() {
        assert!(LambdaFunction::verify_limits(128, 1).is_none());
        assert!(LambdaFunction::verify_limits(10240, 900).is_none());
        assert!(LambdaFunction::verify_limits(127, 30).unwrap().contains("Invalid memory size"));
        assert!(LambdaFunction::verify_limits(128, 901).unwrap().contains("Invalid timeout"));
        assert!(LambdaFunction::verify_limits(128, 0).is_some());
    }

    #[test]
    fn function_names_are_checked() {
        assert!(LambdaFunction::verify_function_name("invalidate_cache-1").is_none());
        assert!(LambdaFunction::verify_function_name(&"a".repeat(65)).is_some());
        assert!(LambdaFunction::verify_function_name("has space").is_some());
    }

    #[test]
    fn custom_runtimes_need_an_archive() {
        let mut f = function();
        f.code = LambdaCode::ZipFile("def handler(e, c): pass".into());
        assert!(f.validate().unwrap_err().contains("Custom runtimes"));
        f.runtime = "python3.12".into();
        f.handler = "index.lambda_handler".into();
        f.validate().unwrap();
        assert_eq!(f.properties()["Code"], json!({ "ZipFile": "def handler(e, c): pass" }));
    }
}
