use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// An image name split into the registry it lives on and its repository path.
///
/// `registry.dev:3000/team/app` has host `registry.dev:3000` and path `team/app`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry_host: String,
    pub image_path: String,
}

impl ImageReference {
    pub fn parse(image: &str) -> Result<Self> {
        Ok(Self {
            registry_host: registry_host(image)?.to_string(),
            image_path: image_path(image)?.to_string(),
        })
    }

    /// Environment variable prefix for this registry's credentials.
    pub fn registry_identity(&self) -> String {
        normalize_registry_identity(&self.registry_host)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry_host, self.image_path)
    }
}

fn split_image(image: &str) -> Result<(&str, &str)> {
    image.split_once('/').ok_or_else(|| Error::MalformedReference {
        image: image.to_string(),
    })
}

/// Returns the first `/`-separated segment of an image name, port included.
pub fn registry_host(image: &str) -> Result<&str> {
    split_image(image).map(|(host, _)| host)
}

/// Returns everything after the registry host, however deeply nested.
pub fn image_path(image: &str) -> Result<&str> {
    split_image(image).map(|(_, path)| path)
}

/// Turns a registry host into an environment-variable-safe name.
///
/// `.`, `:` and `-` become `_` and the result is upper-cased, so `ghcr.io`
/// becomes `GHCR_IO`. Distinct hosts may collide.
pub fn normalize_registry_identity(host: &str) -> String {
    host.chars()
        .map(|c| match c {
            '.' | ':' | '-' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

/// A platform filter as given on the command line, normally `os/arch`.
///
/// The filter is kept verbatim and compared against each manifest's
/// `os/arch`, so anything else (`linux/arm/v7`, `linux`) simply never matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    filter: String,
}

impl Platform {
    /// Case-insensitive comparison against a manifest's declared platform.
    pub fn matches(&self, os: &str, arch: &str) -> bool {
        self.filter.eq_ignore_ascii_case(&format!("{}/{}", os, arch))
    }
}

impl From<&str> for Platform {
    fn from(filter: &str) -> Self {
        Self {
            filter: filter.to_string(),
        }
    }
}

impl FromStr for Platform {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_host() {
        let cases = [
            ("ghcr.io/hsn723/hoge", "ghcr.io"),
            ("my-hoge.registry.dev/hsn723/hoge", "my-hoge.registry.dev"),
            ("registry.dev:3000/hsn723/hoge", "registry.dev:3000"),
        ];
        for (image, expected) in cases {
            assert_eq!(registry_host(image).unwrap(), expected, "image {image}");
        }
    }

    #[test]
    fn test_image_path() {
        let cases = [
            ("ghcr.io/hsn723/hoge", "hsn723/hoge"),
            ("my-hoge.registry.dev/hsn723/hoge/hige", "hsn723/hoge/hige"),
            ("registry.dev:3000/hsn723/hoge", "hsn723/hoge"),
        ];
        for (image, expected) in cases {
            assert_eq!(image_path(image).unwrap(), expected, "image {image}");
        }
    }

    #[test]
    fn test_malformed_images_fail() {
        for image in ["", "hoge"] {
            assert!(matches!(
                registry_host(image),
                Err(Error::MalformedReference { .. })
            ));
            assert!(matches!(
                image_path(image),
                Err(Error::MalformedReference { .. })
            ));
            assert!(ImageReference::parse(image).is_err());
        }
    }

    #[test]
    fn test_reference_round_trips_to_input() {
        for image in [
            "ghcr.io/hsn723/hoge",
            "registry.dev:3000/a/b/c/d",
            "quay.io/cybozu/ubuntu",
        ] {
            let reference = ImageReference::parse(image).unwrap();
            assert_eq!(
                format!("{}/{}", reference.registry_host, reference.image_path),
                image
            );
            assert_eq!(reference.to_string(), image);
        }
    }

    #[test]
    fn test_normalize_registry_identity() {
        assert_eq!(normalize_registry_identity("ghcr.io"), "GHCR_IO");
        assert_eq!(
            normalize_registry_identity("registry.dev:3000"),
            "REGISTRY_DEV_3000"
        );
        assert_eq!(
            normalize_registry_identity("my-hoge.registry.dev"),
            "MY_HOGE_REGISTRY_DEV"
        );
        assert_eq!(normalize_registry_identity(""), "");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_registry_identity("my-hoge.registry.dev:5000");
        assert_eq!(normalize_registry_identity(&once), once);
    }

    #[test]
    fn test_reference_identity() {
        let reference = ImageReference::parse("registry.dev:3000/hsn723/hoge").unwrap();
        assert_eq!(reference.registry_identity(), "REGISTRY_DEV_3000");
    }

    #[test]
    fn test_platform_keeps_filter_verbatim() {
        let platform: Platform = "linux/amd64".parse().unwrap();
        assert_eq!(platform.to_string(), "linux/amd64");
        assert!(platform.matches("linux", "amd64"));

        for odd in ["", "linux", "linux/", "/amd64", "linux/arm/v7"] {
            let platform = Platform::from(odd);
            assert_eq!(platform.to_string(), odd);
            for (os, arch) in [("linux", "amd64"), ("linux", "arm")] {
                assert!(!platform.matches(os, arch), "{odd:?} matched {os}/{arch}");
            }
        }
    }

    #[test]
    fn test_platform_matches_case_insensitively() {
        let platform: Platform = "LINUX/AMD64".parse().unwrap();
        assert!(platform.matches("linux", "amd64"));
        assert!(!platform.matches("linux", "arm64"));
        assert!(!platform.matches("windows", "amd64"));
    }
}
