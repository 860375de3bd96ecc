use serde::Serialize;

use super::*;
use crate::config::GeoRestriction;

/// The hosted zone every CloudFront distribution lives in, used as the
/// target zone of Route 53 alias records.
/// see https://docs.aws.amazon.com/AWSCloudFormation/latest/UserGuide/aws-properties-route53-aliastarget.html
pub const CLOUDFRONT_HOSTED_ZONE_ID: &str = "Z2FDTNDATAQYW2";

/// A distribution declared in the same template, addressed by logical id.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionRef {
    pub logical_id: String,
}

impl DistributionRef {
    pub fn new(logical_id: &str) -> Self {
        Self { logical_id: logical_id.to_string() }
    }
    /// the distribution id, eg: E2QWRUHAPOMQZL
    pub fn id(&self) -> Value {
        get_ref(&self.logical_id)
    }
    /// the generated domain, eg: d111111abcdef8.cloudfront.net
    pub fn domain_name(&self) -> Value {
        get_att(&self.logical_id, "DomainName")
    }
    pub fn hosted_zone_id(&self) -> Value {
        Value::String(CLOUDFRONT_HOSTED_ZONE_ID.to_string())
    }
    pub fn arn(&self) -> Value {
        sub(&format!("arn:aws:cloudfront::${{AWS::AccountId}}:distribution/${{{}}}", self.logical_id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomOriginConfig {
    #[serde(rename = "HTTPPort")]
    pub http_port: u16,
    #[serde(rename = "HTTPSPort")]
    pub https_port: u16,
    pub origin_protocol_policy: String,
    #[serde(rename = "OriginSSLProtocols")]
    pub origin_ssl_protocols: Vec<String>,
}

impl Default for CustomOriginConfig {
    fn default() -> Self {
        Self {
            http_port: 80,
            https_port: 443,
            // S3 website endpoints only speak http
            origin_protocol_policy: "http-only".into(),
            origin_ssl_protocols: vec!["TLSv1.2".into()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct S3OriginConfig {
    /// must be present and empty when an origin access control is used.
    pub origin_access_identity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Origin {
    pub id: String,
    pub domain_name: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_origin_config: Option<CustomOriginConfig>,
    #[serde(rename = "S3OriginConfig", skip_serializing_if = "Option::is_none")]
    pub s3_origin_config: Option<S3OriginConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_access_control_id: Option<Value>,
}

impl Origin {
    /// an S3 website endpoint, reached over plain http.
    pub fn website_endpoint(id: &str, domain_name: Value) -> Self {
        Self {
            id: id.to_string(),
            domain_name,
            custom_origin_config: Some(CustomOriginConfig::default()),
            s3_origin_config: None,
            origin_access_control_id: None,
        }
    }

    /// a private bucket's regional endpoint, reached with signed requests.
    pub fn signed_bucket(id: &str, domain_name: Value, origin_access_control_id: Value) -> Self {
        Self {
            id: id.to_string(),
            domain_name,
            custom_origin_config: None,
            s3_origin_config: Some(S3OriginConfig::default()),
            origin_access_control_id: Some(origin_access_control_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Cookies {
    pub forward: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ForwardedValues {
    pub query_string: bool,
    pub cookies: Cookies,
}

impl Default for ForwardedValues {
    fn default() -> Self {
        Self {
            query_string: false,
            cookies: Cookies { forward: "none".into() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DefaultCacheBehavior {
    pub target_origin_id: String,
    pub viewer_protocol_policy: String,
    pub allowed_methods: Vec<String>,
    pub cached_methods: Vec<String>,
    pub forwarded_values: ForwardedValues,
    pub compress: bool,
}

impl DefaultCacheBehavior {
    /// read only, https only, nothing forwarded to the origin but the path.
    pub fn static_site(target_origin_id: &str) -> Self {
        Self {
            target_origin_id: target_origin_id.to_string(),
            viewer_protocol_policy: "redirect-to-https".into(),
            allowed_methods: vec!["GET".into(), "HEAD".into()],
            cached_methods: vec!["GET".into(), "HEAD".into()],
            forwarded_values: ForwardedValues::default(),
            compress: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ViewerCertificate {
    pub acm_certificate_arn: String,
    pub ssl_support_method: String,
    pub minimum_protocol_version: String,
}

impl ViewerCertificate {
    pub fn sni(acm_certificate_arn: &str) -> Self {
        Self {
            acm_certificate_arn: acm_certificate_arn.to_string(),
            ssl_support_method: "sni-only".into(),
            minimum_protocol_version: "TLSv1.2_2021".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GeoRestrictionConfig {
    pub restriction_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Restrictions {
    pub geo_restriction: GeoRestrictionConfig,
}

impl From<&GeoRestriction> for Restrictions {
    fn from(value: &GeoRestriction) -> Self {
        let (restriction_type, locations) = match value {
            GeoRestriction::None => ("none", vec![]),
            GeoRestriction::Whitelist { locations } => ("whitelist", locations.clone()),
            GeoRestriction::Blacklist { locations } => ("blacklist", locations.clone()),
        };
        Restrictions {
            geo_restriction: GeoRestrictionConfig {
                restriction_type: restriction_type.to_string(),
                locations,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomErrorResponse {
    pub error_code: u16,
    pub response_code: u16,
    pub response_page_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DistributionConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub comment: String,
    pub default_root_object: String,
    pub aliases: Vec<String>,
    pub origins: Vec<Origin>,
    pub default_cache_behavior: DefaultCacheBehavior,
    pub viewer_certificate: ViewerCertificate,
    pub restrictions: Restrictions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub custom_error_responses: Vec<CustomErrorResponse>,
    pub http_version: String,
    #[serde(rename = "IPV6Enabled")]
    pub ipv6_enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloudfrontDistribution {
    pub distribution_config: DistributionConfig,
}

impl CfnResource for CloudfrontDistribution {
    fn type_string(&self) -> &'static str {
        "AWS::CloudFront::Distribution"
    }
    fn properties(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert(
            "DistributionConfig".to_string(),
            serde_json::to_value(&self.distribution_config).unwrap_or(Value::Null),
        );
        Value::Object(map)
    }
    fn validate(&self) -> Result<(), String> {
        let conf = &self.distribution_config;
        if conf.origins.is_empty() {
            return Err("Must provide at least one origin to cloudfront distribution".into());
        }
        for (i, origin) in conf.origins.iter().enumerate() {
            if origin.id.is_empty() {
                return Err(format!("Origin #{i} is missing an id"));
            }
            if conf.origins[..i].iter().any(|o| o.id == origin.id) {
                return Err(format!("Found duplicate origin id {:?}", origin.id));
            }
            if origin.custom_origin_config.is_some() == origin.s3_origin_config.is_some() {
                return Err(format!("Origin {:?} must be either a custom origin or an S3 origin", origin.id));
            }
        }
        let target = &conf.default_cache_behavior.target_origin_id;
        if !conf.origins.iter().any(|o| &o.id == target) {
            return Err(format!("Default cache behavior targets origin {target:?} which is not declared"));
        }
        if !conf.aliases.is_empty() && conf.viewer_certificate.acm_certificate_arn.is_empty() {
            return Err("Distributions with aliases need a viewer certificate".into());
        }
        if conf.default_root_object.starts_with('/') {
            return Err(format!("Invalid default root object {:?}\nMust not start with /", conf.default_root_object));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OriginAccessControl {
    /// must be unique in the account, up to 64 characters.
    pub name: String,
    pub description: String,
}

impl CfnResource for OriginAccessControl {
    fn type_string(&self) -> &'static str {
        "AWS::CloudFront::OriginAccessControl"
    }
    fn properties(&self) -> Value {
        serde_json::json!({
            "OriginAccessControlConfig": {
                "Name": self.name,
                "Description": self.description,
                "OriginAccessControlOriginType": "s3",
                "SigningBehavior": "always",
                "SigningProtocol": "sigv4",
            }
        })
    }
    fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() || self.name.len() > 64 {
            return Err(format!("Invalid origin access control name {:?}\nMust be between 1 and 64 characters", self.name));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn distribution(origin: Origin, target: &str) -> CloudfrontDistribution {
        CloudfrontDistribution {
            distribution_config: DistributionConfig {
                enabled: true,
                comment: String::new(),
                default_root_object: "index.html".into(),
                aliases: vec!["www.example.com".into()],
                origins: vec![origin],
                default_cache_behavior: DefaultCacheBehavior::static_site(target),
                viewer_certificate: ViewerCertificate::sni("arn:cert"),
                restrictions: (&GeoRestriction::None).into(),
                custom_error_responses: vec![],
                http_version: "http2".into(),
                ipv6_enabled: false,
            },
        }
    }

    #[test]
    fn website_origin_serializes_custom_config() {
        let dist = distribution(Origin::website_endpoint("S3WebsiteOrigin", json!("b.s3-website-us-east-1.amazonaws.com")), "S3WebsiteOrigin");
        dist.validate().unwrap();
        let props = dist.properties();
        let conf = &props["DistributionConfig"];
        assert_eq!(conf["Origins"][0], json!({
            "Id": "S3WebsiteOrigin",
            "DomainName": "b.s3-website-us-east-1.amazonaws.com",
            "CustomOriginConfig": {
                "HTTPPort": 80,
                "HTTPSPort": 443,
                "OriginProtocolPolicy": "http-only",
                "OriginSSLProtocols": ["TLSv1.2"],
            },
        }));
        assert_eq!(conf["DefaultCacheBehavior"]["ForwardedValues"], json!({ "QueryString": false, "Cookies": { "Forward": "none" } }));
        assert_eq!(conf["ViewerCertificate"]["SslSupportMethod"], json!("sni-only"));
        assert_eq!(conf["Restrictions"], json!({ "GeoRestriction": { "RestrictionType": "none" } }));
        assert_eq!(conf["IPV6Enabled"], json!(false));
    }

    #[test]
    fn signed_origin_carries_the_access_control() {
        let origin = Origin::signed_bucket("S3BucketOrigin", get_att("Bucket", "RegionalDomainName"), get_ref("Oac"));
        let dist = distribution(origin, "S3BucketOrigin");
        dist.validate().unwrap();
        let props = dist.properties();
        let origin = &props["DistributionConfig"]["Origins"][0];
        assert_eq!(origin["S3OriginConfig"], json!({ "OriginAccessIdentity": "" }));
        assert_eq!(origin["OriginAccessControlId"], json!({ "Ref": "Oac" }));
        assert!(origin.get("CustomOriginConfig").is_none());
    }

    #[test]
    fn cache_behavior_must_target_a_declared_origin() {
        let dist = distribution(Origin::website_endpoint("a", json!("x")), "b");
        let err = dist.validate().unwrap_err();
        assert!(err.contains("targets origin \"b\" which is not declared"), "{err}");
    }

    #[test]
    fn geo_lists_are_rendered() {
        let r: Restrictions = (&GeoRestriction::Whitelist { locations: vec!["US".into()] }).into();
        assert_eq!(serde_json::to_value(r).unwrap(), json!({ "GeoRestriction": { "RestrictionType": "whitelist", "Locations": ["US"] } }));
    }

    #[test]
    fn distribution_ref_points_at_the_same_resource() {
        let d = DistributionRef::new("WebsiteDistribution");
        assert_eq!(d.id(), json!({ "Ref": "WebsiteDistribution" }));
        assert_eq!(d.domain_name(), json!({ "Fn::GetAtt": ["WebsiteDistribution", "DomainName"] }));
        assert_eq!(d.arn(), json!({ "Fn::Sub": "arn:aws:cloudfront::${AWS::AccountId}:distribution/${WebsiteDistribution}" }));
    }

    #[test]
    fn origin_access_control_signs_with_sigv4() {
        let oac = OriginAccessControl { name: "site-oac".into(), description: String::new() };
        let props = oac.properties();
        assert_eq!(props["OriginAccessControlConfig"]["SigningProtocol"], json!("sigv4"));
        assert_eq!(props["OriginAccessControlConfig"]["SigningBehavior"], json!("always"));
        assert!(OriginAccessControl { name: "x".repeat(65), description: String::new() }.validate().is_err());
    }
}
