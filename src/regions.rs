pub const VALID_AWS_REGIONS: &[&'static str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "ca-central-1",
    "ca-west-1",
    "eu-north-1",
    "eu-west-3",
    "eu-west-2",
    "eu-west-1",
    "eu-central-1",
    "eu-central-2",
    "eu-south-1",
    "eu-south-2",
    "ap-south-1",
    "ap-south-2",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-east-1",
    "sa-east-1",
    "cn-north-1",
    "cn-northwest-1",
    "us-gov-east-1",
    "us-gov-west-1",
    "me-south-1",
    "me-central-1",
    "il-central-1",
    "af-south-1",
];

/// CloudFront only accepts viewer certificates issued in this region.
pub const CLOUDFRONT_CERTIFICATE_REGION: &str = "us-east-1";

pub fn is_valid_region(r: &str) -> bool {
    VALID_AWS_REGIONS.contains(&r)
}

pub fn verify_region(r: &str) -> Option<String> {
    if !is_valid_region(r) {
        Some(format!("Invalid region code {:?}\nMust be one of {:?}", r, VALID_AWS_REGIONS))
    } else {
        None
    }
}

/// checks that an ACM certificate ARN can be attached to a CloudFront distribution.
pub fn verify_cloudfront_certificate(arn: &str) -> Option<String> {
    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    if parts.len() != 6 || parts[0] != "arn" || parts[2] != "acm" || !parts[5].starts_with("certificate/") {
        return Some(format!("Invalid ACM certificate ARN {:?}\nExpected arn:aws:acm:{CLOUDFRONT_CERTIFICATE_REGION}:<account>:certificate/<id>", arn));
    }
    if parts[3] != CLOUDFRONT_CERTIFICATE_REGION {
        return Some(format!("Invalid ACM certificate ARN {:?}\nCloudFront requires certificates issued in {CLOUDFRONT_CERTIFICATE_REGION}, found {}", arn, parts[3]));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_regions() {
        assert!(verify_region("us-east-1").is_none());
        let err = verify_region("mars-north-1").unwrap();
        assert!(err.contains("Invalid region code"));
    }

    #[test]
    fn certificate_must_live_in_us_east_1() {
        assert!(verify_cloudfront_certificate("arn:aws:acm:us-east-1:123456789012:certificate/abc-123").is_none());
        let err = verify_cloudfront_certificate("arn:aws:acm:eu-west-1:123456789012:certificate/abc-123").unwrap();
        assert!(err.contains("found eu-west-1"));
        let err = verify_cloudfront_certificate("not-an-arn").unwrap();
        assert!(err.contains("Invalid ACM certificate ARN"));
    }
}
