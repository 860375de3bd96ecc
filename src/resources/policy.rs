use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use super::*;

pub const POLICY_VERSION: &str = "2012-10-17";
pub const GITHUB_OIDC_HOST: &str = "token.actions.githubusercontent.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    /// anonymous, serialized as `"*"`
    Any,
    Service(String),
    Federated(Value),
}

impl Serialize for Principal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Principal::Any => serializer.serialize_str("*"),
            Principal::Service(s) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Service", s)?;
                map.end()
            }
            Principal::Federated(v) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Federated", v)?;
                map.end()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub effect: Effect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    pub action: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource: Vec<Value>,
    /// operator -> condition key -> value
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub condition: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Statement {
    pub fn allow(actions: &[&str]) -> Self {
        Self {
            effect: Effect::Allow,
            principal: None,
            action: actions.iter().map(|a| a.to_string()).collect(),
            resource: vec![],
            condition: Default::default(),
        }
    }
    pub fn principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }
    pub fn resource(mut self, resource: Value) -> Self {
        self.resource.push(resource);
        self
    }
    pub fn condition(mut self, operator: &str, key: &str, value: Value) -> Self {
        self.condition.entry(operator.to_string()).or_default().insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    pub fn new(statement: Vec<Statement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement,
        }
    }
    pub fn to_value(&self) -> Value {
        // serializing these types cannot fail: every key is a string
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

pub fn bucket_arn(bucket_name: &str) -> String {
    format!("arn:aws:s3:::{bucket_name}")
}

pub fn bucket_objects_arn(bucket_name: &str) -> String {
    format!("arn:aws:s3:::{bucket_name}/*")
}

/// anonymous read of every object. Used when the bucket itself is the website.
pub fn public_read_policy(bucket_name: &str) -> PolicyDocument {
    PolicyDocument::new(vec![
        Statement::allow(&["s3:GetObject"])
            .principal(Principal::Any)
            .resource(Value::String(bucket_objects_arn(bucket_name))),
    ])
}

/// read access for CloudFront only, and only on behalf of one distribution.
pub fn cloudfront_read_policy(bucket_name: &str, distribution_arn: Value) -> PolicyDocument {
    PolicyDocument::new(vec![
        Statement::allow(&["s3:GetObject"])
            .principal(Principal::Service("cloudfront.amazonaws.com".into()))
            .resource(Value::String(bucket_objects_arn(bucket_name)))
            .condition("StringEquals", "AWS:SourceArn", distribution_arn),
    ])
}

pub fn lambda_assume_role_policy() -> PolicyDocument {
    PolicyDocument::new(vec![
        Statement::allow(&["sts:AssumeRole"])
            .principal(Principal::Service("lambda.amazonaws.com".into())),
    ])
}

/// lets GitHub Actions workflows whose token matches `audience` and
/// `subject` exactly assume the role.
pub fn github_trust_policy(provider_arn: Value, audience: &str, subject: &str) -> PolicyDocument {
    PolicyDocument::new(vec![
        Statement::allow(&["sts:AssumeRoleWithWebIdentity"])
            .principal(Principal::Federated(provider_arn))
            .condition("StringEquals", &format!("{GITHUB_OIDC_HOST}:aud"), Value::String(audience.to_string()))
            .condition("StringEquals", &format!("{GITHUB_OIDC_HOST}:sub"), Value::String(subject.to_string())),
    ])
}

pub fn invalidation_policy(distribution_arn: Value) -> PolicyDocument {
    PolicyDocument::new(vec![
        Statement::allow(&["cloudfront:CreateInvalidation"]).resource(distribution_arn),
    ])
}

/// what a CI deployment needs: sync the bucket, refresh the edge cache.
pub fn deployment_policy(bucket_name: &str, distribution_arn: Value, function_arn: Option<Value>) -> PolicyDocument {
    let mut statements = vec![
        Statement::allow(&["s3:PutObject", "s3:ListBucket", "s3:DeleteObject", "s3:GetObject"])
            .resource(Value::String(bucket_arn(bucket_name)))
            .resource(Value::String(bucket_objects_arn(bucket_name))),
    ];
    if let Some(arn) = function_arn {
        statements.push(Statement::allow(&["lambda:InvokeFunction"]).resource(arn));
    }
    statements.push(Statement::allow(&["cloudfront:CreateInvalidation"]).resource(distribution_arn));
    PolicyDocument::new(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn public_read_targets_exactly_the_bucket_objects() {
        let doc = public_read_policy("my-bucket").to_value();
        assert_eq!(doc, json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": "*",
                "Action": ["s3:GetObject"],
                "Resource": ["arn:aws:s3:::my-bucket/*"],
            }],
        }));
    }

    #[test]
    fn cloudfront_read_is_scoped_to_the_distribution() {
        let doc = cloudfront_read_policy("my-bucket", sub("arn:aws:cloudfront::${AWS::AccountId}:distribution/${Dist}")).to_value();
        assert_eq!(doc["Statement"][0]["Principal"], json!({ "Service": "cloudfront.amazonaws.com" }));
        assert_eq!(
            doc["Statement"][0]["Condition"]["StringEquals"]["AWS:SourceArn"],
            json!({ "Fn::Sub": "arn:aws:cloudfront::${AWS::AccountId}:distribution/${Dist}" })
        );
    }

    #[test]
    fn github_trust_uses_oidc_claims() {
        let doc = github_trust_policy(json!("arn:provider"), "sts.amazonaws.com", "repo:o/r:ref:refs/heads/main").to_value();
        assert_eq!(doc["Statement"][0], json!({
            "Effect": "Allow",
            "Principal": { "Federated": "arn:provider" },
            "Action": ["sts:AssumeRoleWithWebIdentity"],
            "Condition": {
                "StringEquals": {
                    "token.actions.githubusercontent.com:aud": "sts.amazonaws.com",
                    "token.actions.githubusercontent.com:sub": "repo:o/r:ref:refs/heads/main",
                },
            },
        }));
    }

    #[test]
    fn deployment_policy_only_invokes_a_declared_function() {
        let without = deployment_policy("b", json!("dist"), None).to_value();
        assert_eq!(without["Statement"].as_array().unwrap().len(), 2);
        let with = deployment_policy("b", json!("dist"), Some(json!("fn"))).to_value();
        assert_eq!(with["Statement"][1]["Action"], json!(["lambda:InvokeFunction"]));
        assert_eq!(with["Statement"][0]["Resource"], json!(["arn:aws:s3:::b", "arn:aws:s3:::b/*"]));
    }
}
