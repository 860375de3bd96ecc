use serde::Serialize;

use super::*;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebsiteConfiguration {
    pub index_document: String,
    pub error_document: String,
}

impl Default for WebsiteConfiguration {
    fn default() -> Self {
        Self {
            index_document: "index.html".into(),
            error_document: "error.html".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublicAccessBlock {
    pub block_public_acls: bool,
    pub block_public_policy: bool,
    pub ignore_public_acls: bool,
    pub restrict_public_buckets: bool,
}

impl PublicAccessBlock {
    /// everything blocked. CloudFront still gets in through the bucket policy
    /// because its principal is a service, not the public.
    pub fn private() -> Self {
        Self {
            block_public_acls: true,
            block_public_policy: true,
            ignore_public_acls: true,
            restrict_public_buckets: true,
        }
    }

    /// nothing blocked, so a public-read bucket policy can be attached.
    pub fn open() -> Self {
        Self {
            block_public_acls: false,
            block_public_policy: false,
            ignore_public_acls: false,
            restrict_public_buckets: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct S3Bucket {
    pub bucket_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_configuration: Option<WebsiteConfiguration>,
    pub public_access_block_configuration: PublicAccessBlock,
}

impl S3Bucket {
    /// a bucket served directly as a website, readable by anyone.
    pub fn public_website(name: &str, website: WebsiteConfiguration) -> Self {
        Self {
            bucket_name: name.to_string(),
            website_configuration: Some(website),
            public_access_block_configuration: PublicAccessBlock::open(),
        }
    }

    /// a bucket only reachable through signed CloudFront requests.
    pub fn private(name: &str) -> Self {
        Self {
            bucket_name: name.to_string(),
            website_configuration: None,
            public_access_block_configuration: PublicAccessBlock::private(),
        }
    }
}

impl CfnResource for S3Bucket {
    fn type_string(&self) -> &'static str {
        "AWS::S3::Bucket"
    }
    fn properties(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
    fn validate(&self) -> Result<(), String> {
        if let Some(err) = verify_bucket_name(&self.bucket_name) {
            return Err(err);
        }
        if let Some(site) = &self.website_configuration {
            if site.index_document.is_empty() || site.index_document.contains('/') {
                return Err(format!("Invalid index document {:?}\nMust be a suffix such as index.html", site.index_document));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketPolicy {
    /// usually a Ref to the bucket resource, so the policy is created after it.
    pub bucket: Value,
    pub policy_document: PolicyDocument,
}

impl CfnResource for BucketPolicy {
    fn type_string(&self) -> &'static str {
        "AWS::S3::BucketPolicy"
    }
    fn properties(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("Bucket".to_string(), self.bucket.clone());
        map.insert("PolicyDocument".to_string(), self.policy_document.to_value());
        Value::Object(map)
    }
    fn validate(&self) -> Result<(), String> {
        if self.policy_document.statement.is_empty() {
            return Err("Bucket policy must contain at least one statement".into());
        }
        Ok(())
    }
}

pub fn verify_bucket_name(bucket_name: &str) -> Option<String> {
    if bucket_name.len() > 63 || bucket_name.len() < 3 {
        return Some(format!("Invalid bucket name {:?}\nMust be between 3 and 63 characters", bucket_name));
    }
    let valid_char_check = |c: char| -> bool {
        c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-'
    };
    if !bucket_name.chars().all(valid_char_check) {
        return Some(format!("Invalid bucket name {:?}\nMay only contain lowercase letters, numbers, dots, and dashes", bucket_name));
    }
    let first_char = bucket_name.chars().next().unwrap_or('-');
    let last_char = bucket_name.chars().last().unwrap_or('-');
    if !first_char.is_ascii_alphanumeric() || !last_char.is_ascii_alphanumeric() {
        return Some(format!("Invalid bucket name {:?}\nFirst and last character must be either lowercase letter, or number", bucket_name));
    }
    if bucket_name.contains("..") {
        return Some(format!("Invalid bucket name {:?}\nMay not contain two consecutive dots", bucket_name));
    }
    if bucket_name.starts_with("xn--") || bucket_name.ends_with("-s3alias") {
        return Some(format!("Invalid bucket name {:?}\nMay not use the reserved xn-- prefix or -s3alias suffix", bucket_name));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn public_website_bucket_properties() {
        let bucket = S3Bucket::public_website("my-site", WebsiteConfiguration::default());
        assert_eq!(bucket.properties(), json!({
            "BucketName": "my-site",
            "WebsiteConfiguration": { "IndexDocument": "index.html", "ErrorDocument": "error.html" },
            "PublicAccessBlockConfiguration": {
                "BlockPublicAcls": false,
                "BlockPublicPolicy": false,
                "IgnorePublicAcls": false,
                "RestrictPublicBuckets": false,
            },
        }));
    }

    #[test]
    fn private_bucket_has_no_website() {
        let props = S3Bucket::private("my-site").properties();
        assert!(props.get("WebsiteConfiguration").is_none());
        assert_eq!(props["PublicAccessBlockConfiguration"]["RestrictPublicBuckets"], json!(true));
    }

    #[test]
    fn bucket_names_follow_s3_rules() {
        assert!(verify_bucket_name("jtc.wanfooru.com").is_none());
        assert!(verify_bucket_name("ab").unwrap().contains("Must be between 3 and 63 characters"));
        assert!(verify_bucket_name("Upper").unwrap().contains("lowercase"));
        assert!(verify_bucket_name("-dash").unwrap().contains("First and last"));
        assert!(verify_bucket_name("something..exact").unwrap().contains("May not contain two consecutive dots"));
        assert!(verify_bucket_name("xn--bucket").is_some());
    }

    #[test]
    fn bucket_policy_wraps_document() {
        let policy = BucketPolicy { bucket: get_ref("Bucket"), policy_document: public_read_policy("b-1") };
        let props = policy.properties();
        assert_eq!(props["Bucket"], json!({ "Ref": "Bucket" }));
        assert_eq!(props["PolicyDocument"]["Statement"][0]["Resource"], json!(["arn:aws:s3:::b-1/*"]));
        let empty = BucketPolicy { bucket: get_ref("Bucket"), policy_document: PolicyDocument::new(vec![]) };
        assert!(empty.validate().is_err());
    }
}
