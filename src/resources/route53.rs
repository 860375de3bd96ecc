use serde::Serialize;

use super::*;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AliasTarget {
    #[serde(rename = "DNSName")]
    pub dns_name: Value,
    pub hosted_zone_id: Value,
    pub evaluate_target_health: bool,
}

impl AliasTarget {
    pub fn distribution(distribution: &DistributionRef) -> Self {
        Self {
            dns_name: distribution.domain_name(),
            hosted_zone_id: distribution.hosted_zone_id(),
            // CloudFront aliases do not support health evaluation
            evaluate_target_health: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Route53RecordSet {
    pub hosted_zone_id: String,
    pub name: String,
    #[serde(rename = "Type")]
    pub record_type: String,
    pub alias_target: AliasTarget,
}

impl Route53RecordSet {
    /// an `A` (or `AAAA` when `ipv6`) alias pointing `name` at the distribution.
    pub fn alias(hosted_zone_id: &str, name: &str, ipv6: bool, target: AliasTarget) -> Self {
        Self {
            hosted_zone_id: hosted_zone_id.to_string(),
            name: name.to_string(),
            record_type: if ipv6 { "AAAA".into() } else { "A".into() },
            alias_target: target,
        }
    }
}

impl CfnResource for Route53RecordSet {
    fn type_string(&self) -> &'static str {
        "AWS::Route53::RecordSet"
    }
    fn properties(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
    fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("Route53 record must have a name. Example mysubdomain.mywebsite.com".into());
        }
        if self.hosted_zone_id.is_empty() {
            return Err(format!("Route53 record {:?} must have a hosted zone id", self.name));
        }
        if self.record_type != "A" && self.record_type != "AAAA" {
            return Err(format!("Alias records must be of type A or AAAA, found {:?}", self.record_type));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn alias_points_at_the_distribution() {
        let dist = DistributionRef::new("WebsiteDistribution");
        let record = Route53RecordSet::alias("Z111", "www.example.com", false, AliasTarget::distribution(&dist));
        record.validate().unwrap();
        assert_eq!(record.properties(), json!({
            "HostedZoneId": "Z111",
            "Name": "www.example.com",
            "Type": "A",
            "AliasTarget": {
                "DNSName": { "Fn::GetAtt": ["WebsiteDistribution", "DomainName"] },
                "HostedZoneId": "Z2FDTNDATAQYW2",
                "EvaluateTargetHealth": false,
            },
        }));
    }

    #[test]
    fn records_need_name_and_zone() {
        let dist = DistributionRef::new("D");
        assert!(Route53RecordSet::alias("", "www.example.com", false, AliasTarget::distribution(&dist)).validate().is_err());
        assert!(Route53RecordSet::alias("Z1", "", true, AliasTarget::distribution(&dist)).validate().is_err());
        assert_eq!(Route53RecordSet::alias("Z1", "a.b", true, AliasTarget::distribution(&dist)).record_type, "AAAA");
    }
}
