use super::*;

/// thumbprint of the GitHub Actions OIDC issuer. IAM no longer checks it for
/// this provider, but CloudFormation still requires one.
pub const GITHUB_OIDC_THUMBPRINT: &str = "6938fd4d98bab03faadb97b34396831e3780aea1";

#[derive(Debug, Clone, PartialEq)]
pub struct InlinePolicy {
    pub policy_name: String,
    pub policy_document: PolicyDocument,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IamRole {
    /// empty means CloudFormation generates a name.
    pub role_name: String,
    pub description: String,
    pub assume_role_policy_document: PolicyDocument,
    pub managed_policy_arns: Vec<String>,
    pub policies: Vec<InlinePolicy>,
}

impl IamRole {
    pub fn new(assume_role_policy_document: PolicyDocument) -> Self {
        Self {
            role_name: String::new(),
            description: String::new(),
            assume_role_policy_document,
            managed_policy_arns: vec![],
            policies: vec![],
        }
    }

    pub fn with_policy(mut self, policy_name: &str, policy_document: PolicyDocument) -> Self {
        self.policies.push(InlinePolicy { policy_name: policy_name.to_string(), policy_document });
        self
    }
}

impl CfnResource for IamRole {
    fn type_string(&self) -> &'static str {
        "AWS::IAM::Role"
    }
    fn properties(&self) -> Value {
        let mut map = serde_json::Map::new();
        if !self.role_name.is_empty() {
            map.insert("RoleName".into(), Value::String(self.role_name.clone()));
        }
        if !self.description.is_empty() {
            map.insert("Description".into(), Value::String(self.description.clone()));
        }
        map.insert("AssumeRolePolicyDocument".into(), self.assume_role_policy_document.to_value());
        if !self.managed_policy_arns.is_empty() {
            let arns = self.managed_policy_arns.iter().map(|a| Value::String(a.clone())).collect();
            map.insert("ManagedPolicyArns".into(), Value::Array(arns));
        }
        if !self.policies.is_empty() {
            let policies = self.policies.iter().map(|p| {
                let mut policy = serde_json::Map::new();
                policy.insert("PolicyName".into(), Value::String(p.policy_name.clone()));
                policy.insert("PolicyDocument".into(), p.policy_document.to_value());
                Value::Object(policy)
            }).collect();
            map.insert("Policies".into(), Value::Array(policies));
        }
        Value::Object(map)
    }
    fn validate(&self) -> Result<(), String> {
        if self.role_name.len() > 64 {
            return Err(format!("Invalid role name {:?}\nMust be at most 64 characters", self.role_name));
        }
        if !self.role_name.chars().all(|c| c.is_ascii_alphanumeric() || "+=,.@_-".contains(c)) {
            return Err(format!("Invalid role name {:?}", self.role_name));
        }
        if self.assume_role_policy_document.statement.iter().any(|s| s.principal.is_none()) {
            return Err("Every statement of a trust policy needs a principal".into());
        }
        for p in self.policies.iter() {
            if p.policy_name.is_empty() || p.policy_document.statement.is_empty() {
                return Err(format!("Inline policy {:?} must have a name and at least one statement", p.policy_name));
            }
        }
        Ok(())
    }
}

/// the account wide identity provider for GitHub Actions tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct OidcProvider {
    pub url: String,
    pub client_ids: Vec<String>,
    pub thumbprints: Vec<String>,
}

impl OidcProvider {
    pub fn github(audience: &str) -> Self {
        Self {
            url: format!("https://{GITHUB_OIDC_HOST}"),
            client_ids: vec![audience.to_string()],
            thumbprints: vec![GITHUB_OIDC_THUMBPRINT.to_string()],
        }
    }

    /// arn of a provider that already exists in the account
    pub fn existing_github_arn() -> Value {
        sub(&format!("arn:aws:iam::${{AWS::AccountId}}:oidc-provider/{GITHUB_OIDC_HOST}"))
    }
}

impl CfnResource for OidcProvider {
    fn type_string(&self) -> &'static str {
        "AWS::IAM::OIDCProvider"
    }
    fn properties(&self) -> Value {
        serde_json::json!({
            "Url": self.url,
            "ClientIdList": self.client_ids,
            "ThumbprintList": self.thumbprints,
        })
    }
    fn validate(&self) -> Result<(), String> {
        if !self.url.starts_with("https://") {
            return Err(format!("OIDC provider url {:?} must use https", self.url));
        }
        if self.client_ids.is_empty() {
            return Err("OIDC provider needs at least one client id".into());
        }
        Ok(())
    }
}
