//! Browser image family classification.
//!
//! The registry prefix of the configured image decides how the pod is
//! assembled: which home directory the shared volumes mount under, which VNC
//! password ships with the image, and which container set is required.

/// Supported browser image families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFamily {
    Selenium,
    Selenoid,
    Aerokube,
    /// Recognized but not launchable.
    Microsoft,
}

impl ImageFamily {
    pub fn homedir(self) -> &'static str {
        match self {
            ImageFamily::Selenium => "/home/seluser",
            ImageFamily::Selenoid | ImageFamily::Aerokube => "/home/user",
            ImageFamily::Microsoft => "/home/user",
        }
    }

    pub fn vnc_pass(self) -> &'static str {
        match self {
            ImageFamily::Selenoid => "selenoid",
            _ => "browserkube",
        }
    }
}

/// Classifies an image reference by its registry prefix. Total over its
/// input: anything unrecognized is an error, never a fallback family.
pub fn parse_image_family(image: &str) -> Result<ImageFamily, crate::OperatorError> {
    let Some(idx) = image.rfind('/') else {
        return Err(crate::OperatorError::UnsupportedImage(image.to_owned()));
    };
    match &image[..idx] {
        "selenium" => Ok(ImageFamily::Selenium),
        "selenoid" => Ok(ImageFamily::Selenoid),
        "quay.io/browser" | "cdtp" | "playwright" => Ok(ImageFamily::Aerokube),
        "mcr.microsoft.com" => Ok(ImageFamily::Microsoft),
        other => Err(crate::OperatorError::UnsupportedImage(other.to_owned())),
    }
}
