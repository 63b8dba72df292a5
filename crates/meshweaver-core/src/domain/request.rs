//! GenerationRequest: the immutable description of what to generate.
//!
//! Options are a closed structure. Dynamic option maps coming from a UI are
//! checked against the keys each generation kind recognizes, so a typo is
//! rejected here instead of being silently ignored by the remote service.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::errors::SubmitError;

/// Upload size limit of the remote service.
pub const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

/// Prompt length limit of the remote service.
pub const MAX_PROMPT_CHARS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    Text,
    Image,
    Multiview,
}

impl GenerationKind {
    /// Task type name on the wire.
    pub fn task_type(self) -> &'static str {
        match self {
            GenerationKind::Text => "text_to_model",
            GenerationKind::Image => "image_to_model",
            GenerationKind::Multiview => "multiview_to_model",
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GenerationKind::Text => "text",
            GenerationKind::Image => "image",
            GenerationKind::Multiview => "multiview",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum ModelVersion {
    #[serde(rename = "v1.4-20240625")]
    V1_4,
    #[serde(rename = "v2.0-20240919")]
    V2_0,
    #[default]
    #[serde(rename = "v2.5-20250123")]
    V2_5,
    #[serde(rename = "v3.0-20250812")]
    V3_0,
}

impl ModelVersion {
    pub const ALL: [ModelVersion; 4] = [
        ModelVersion::V1_4,
        ModelVersion::V2_0,
        ModelVersion::V2_5,
        ModelVersion::V3_0,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelVersion::V1_4 => "v1.4-20240625",
            ModelVersion::V2_0 => "v2.0-20240919",
            ModelVersion::V2_5 => "v2.5-20250123",
            ModelVersion::V3_0 => "v3.0-20250812",
        }
    }

    /// Texture / PBR / quad / style controls exist from v2 on.
    pub fn supports_advanced(self) -> bool {
        self >= ModelVersion::V2_0
    }

    pub fn supports_geometry_quality(self) -> bool {
        self >= ModelVersion::V3_0
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelVersion {
    type Err = SubmitError;

    /// Accepts the full name (`v2.5-20250123`) or the short one (`v2.5`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelVersion::ALL
            .into_iter()
            .find(|v| v.as_str() == s || v.as_str().split('-').next() == Some(s))
            .ok_or_else(|| SubmitError::InvalidOption(format!("unknown model version `{s}`")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpg,
    Png,
    Webp,
}

impl ImageFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageFormat::Jpg),
            "png" => Some(ImageFormat::Png),
            "webp" => Some(ImageFormat::Webp),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImageFormat::Jpg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ImageFormat::Jpg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
        }
    }
}

/// An image the service already holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileToken {
    pub token: String,
    pub format: ImageFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ImageRef {
    /// Already uploaded; the token is sent as is.
    Uploaded(FileToken),
    /// A local file; uploaded by the submit operation.
    Local { path: PathBuf },
}

impl ImageRef {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        ImageRef::Local { path: path.into() }
    }

    pub fn uploaded(token: impl Into<String>, format: ImageFormat) -> Self {
        ImageRef::Uploaded(FileToken {
            token: token.into(),
            format,
        })
    }

    fn validate(&self) -> Result<(), SubmitError> {
        match self {
            ImageRef::Uploaded(t) if t.token.trim().is_empty() => Err(SubmitError::EmptyToken),
            ImageRef::Uploaded(_) => Ok(()),
            ImageRef::Local { path } => validate_local_image(path).map(|_| ()),
        }
    }

    fn label(&self) -> String {
        match self {
            ImageRef::Uploaded(t) => t.token.clone(),
            ImageRef::Local { path } => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        }
    }

    fn resolved(&self, uploads: &HashMap<PathBuf, FileToken>) -> ImageRef {
        match self {
            ImageRef::Local { path } => uploads
                .get(path)
                .map(|t| ImageRef::Uploaded(t.clone()))
                .unwrap_or_else(|| self.clone()),
            ImageRef::Uploaded(_) => self.clone(),
        }
    }

    fn file_json(&self) -> Result<Value, SubmitError> {
        match self {
            ImageRef::Uploaded(t) => Ok(json!({ "type": t.format.as_str(), "file_token": t.token })),
            ImageRef::Local { path } => Err(SubmitError::NotUploaded(path.clone())),
        }
    }
}

/// Checks a local image the way the service would, returning its format.
pub fn validate_local_image(path: &Path) -> Result<ImageFormat, SubmitError> {
    let meta =
        std::fs::metadata(path).map_err(|_| SubmitError::ImageNotFound(path.to_path_buf()))?;
    if !meta.is_file() {
        return Err(SubmitError::ImageNotFound(path.to_path_buf()));
    }
    if meta.len() > MAX_IMAGE_BYTES {
        return Err(SubmitError::ImageTooLarge {
            path: path.to_path_buf(),
            size: meta.len(),
            max: MAX_IMAGE_BYTES,
        });
    }
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    ImageFormat::from_extension(&ext).ok_or(SubmitError::UnsupportedImageType {
        path: path.to_path_buf(),
        ext,
    })
}

/// Views for multiview generation. Front, left and back are required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiviewImages {
    pub front: ImageRef,
    pub left: ImageRef,
    pub back: ImageRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<ImageRef>,
}

impl MultiviewImages {
    fn iter(&self) -> impl Iterator<Item = &ImageRef> {
        [Some(&self.front), Some(&self.left), Some(&self.back), self.right.as_ref()]
            .into_iter()
            .flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationInput {
    Text {
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        negative_prompt: Option<String>,
    },
    Image {
        image: ImageRef,
    },
    Multiview {
        views: MultiviewImages,
    },
}

impl GenerationInput {
    pub fn kind(&self) -> GenerationKind {
        match self {
            GenerationInput::Text { .. } => GenerationKind::Text,
            GenerationInput::Image { .. } => GenerationKind::Image,
            GenerationInput::Multiview { .. } => GenerationKind::Multiview,
        }
    }

    fn images(&self) -> Vec<&ImageRef> {
        match self {
            GenerationInput::Text { .. } => Vec::new(),
            GenerationInput::Image { image } => vec![image],
            GenerationInput::Multiview { views } => views.iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureQuality {
    #[default]
    Standard,
    /// Higher-resolution texture render on the remote side.
    Detailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureAlignment {
    /// Texture follows the input image colors.
    #[default]
    OriginalImage,
    /// Texture follows the generated geometry.
    Geometry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryQuality {
    #[default]
    Standard,
    Detailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Default,
    /// Rotate the model to match the input image.
    AlignImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelStyle {
    #[serde(rename = "person:person2cartoon")]
    Cartoon,
    #[serde(rename = "object:clay")]
    Clay,
    #[serde(rename = "object:steampunk")]
    Steampunk,
    #[serde(rename = "animal:venom")]
    Venom,
    #[serde(rename = "object:barbie")]
    Barbie,
    #[serde(rename = "object:christmas")]
    Christmas,
    #[serde(rename = "gold")]
    Gold,
    #[serde(rename = "ancient_bronze")]
    AncientBronze,
}

/// Advanced generation options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationOptions {
    /// Generate a texture at all.
    pub texture: bool,
    /// Generate PBR material maps.
    pub pbr: bool,
    pub texture_quality: TextureQuality,
    /// Image inputs only.
    pub texture_alignment: TextureAlignment,
    /// v3 models only.
    pub geometry_quality: Option<GeometryQuality>,
    /// Upper bound on mesh faces; the service picks one adaptively when absent.
    pub face_limit: Option<u32>,
    /// Geometry seed.
    pub seed: Option<u32>,
    pub texture_seed: Option<u32>,
    /// Not available for multiview.
    pub style: Option<ModelStyle>,
    /// Scale the model to real-world size (meters).
    pub auto_size: bool,
    /// Quad mesh output (delivered as FBX).
    pub quad: bool,
    /// Image inputs only.
    pub orientation: Orientation,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            texture: true,
            pbr: true,
            texture_quality: TextureQuality::Standard,
            texture_alignment: TextureAlignment::OriginalImage,
            geometry_quality: None,
            face_limit: None,
            seed: None,
            texture_seed: None,
            style: None,
            auto_size: false,
            quad: false,
            orientation: Orientation::Default,
        }
    }
}

const COMMON_KEYS: &[&str] = &["face_limit", "seed"];
const ADVANCED_KEYS: &[&str] = &[
    "texture",
    "pbr",
    "texture_quality",
    "texture_seed",
    "auto_size",
    "quad",
    "geometry_quality",
];
const IMAGE_ONLY_KEYS: &[&str] = &["texture_alignment", "orientation"];
const V2_ONLY_KEYS: &[&str] = &[
    "texture",
    "pbr",
    "texture_quality",
    "texture_seed",
    "auto_size",
    "quad",
    "geometry_quality",
    "style",
    "texture_alignment",
    "orientation",
];

impl GenerationOptions {
    /// Whether `key` is an option `kind` generation understands at all.
    pub fn recognizes(kind: GenerationKind, key: &str) -> bool {
        if COMMON_KEYS.contains(&key) || ADVANCED_KEYS.contains(&key) {
            return true;
        }
        match kind {
            GenerationKind::Text => key == "style",
            GenerationKind::Image => key == "style" || IMAGE_ONLY_KEYS.contains(&key),
            GenerationKind::Multiview => IMAGE_ONLY_KEYS.contains(&key),
        }
    }

    /// Builds options from a loose key/value map (UI form state).
    pub fn from_map(
        kind: GenerationKind,
        version: ModelVersion,
        map: &Map<String, Value>,
    ) -> Result<Self, SubmitError> {
        for key in map.keys() {
            if !Self::recognizes(kind, key) {
                return Err(SubmitError::UnknownOption {
                    kind,
                    key: key.clone(),
                });
            }
            if !version.supports_advanced()
                && let Some(option) = V2_ONLY_KEYS.iter().copied().find(|k| *k == key.as_str())
            {
                return Err(SubmitError::Unsupported { option, version });
            }
        }
        let options: Self = serde_json::from_value(Value::Object(map.clone()))
            .map_err(|e| SubmitError::InvalidOption(e.to_string()))?;
        options.validate(kind, version)?;
        Ok(options)
    }

    pub fn validate(&self, kind: GenerationKind, version: ModelVersion) -> Result<(), SubmitError> {
        if self.face_limit == Some(0) {
            return Err(SubmitError::InvalidOption("face_limit must be positive".into()));
        }
        if self.style.is_some() && kind == GenerationKind::Multiview {
            return Err(SubmitError::NotApplicable {
                option: "style",
                kind,
            });
        }
        if !version.supports_advanced() {
            // defaults of the bool/enum options are fine; only explicit choices are rejected
            let explicit = [
                ("quad", self.quad),
                ("texture_quality", self.texture_quality != TextureQuality::Standard),
                ("style", self.style.is_some()),
                ("texture_seed", self.texture_seed.is_some()),
            ];
            if let Some((option, _)) = explicit.into_iter().find(|(_, set)| *set) {
                return Err(SubmitError::Unsupported { option, version });
            }
        }
        if self.geometry_quality.is_some() && !version.supports_geometry_quality() {
            return Err(SubmitError::Unsupported {
                option: "geometry_quality",
                version,
            });
        }
        Ok(())
    }

    fn write_payload(&self, kind: GenerationKind, version: ModelVersion, out: &mut Map<String, Value>) {
        if let Some(limit) = self.face_limit {
            out.insert("face_limit".into(), json!(limit));
        }
        if let Some(seed) = self.seed {
            out.insert("model_seed".into(), json!(seed));
        }
        if !version.supports_advanced() {
            return;
        }
        out.insert("texture".into(), json!(self.texture));
        out.insert("pbr".into(), json!(self.pbr));
        out.insert("texture_quality".into(), json!(self.texture_quality));
        out.insert("auto_size".into(), json!(self.auto_size));
        out.insert("quad".into(), json!(self.quad));
        if let Some(seed) = self.texture_seed {
            out.insert("texture_seed".into(), json!(seed));
        }
        if let Some(style) = self.style {
            out.insert("style".into(), json!(style));
        }
        if let Some(q) = self.geometry_quality {
            out.insert("geometry_quality".into(), json!(q));
        }
        if kind != GenerationKind::Text {
            out.insert("texture_alignment".into(), json!(self.texture_alignment));
            out.insert("orientation".into(), json!(self.orientation));
        }
    }
}

/// Short, display-only description of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub kind: GenerationKind,
    pub label: String,
    pub model_version: ModelVersion,
}

/// Immutable description of what to generate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    input: GenerationInput,
    model_version: ModelVersion,
    #[serde(default)]
    options: GenerationOptions,
}

impl GenerationRequest {
    pub fn new(input: GenerationInput, model_version: ModelVersion, options: GenerationOptions) -> Self {
        Self {
            input,
            model_version,
            options,
        }
    }

    pub fn text(prompt: impl Into<String>) -> Self {
        Self::new(
            GenerationInput::Text {
                prompt: prompt.into(),
                negative_prompt: None,
            },
            ModelVersion::default(),
            GenerationOptions::default(),
        )
    }

    pub fn image(image: ImageRef) -> Self {
        Self::new(
            GenerationInput::Image { image },
            ModelVersion::default(),
            GenerationOptions::default(),
        )
    }

    pub fn multiview(views: MultiviewImages) -> Self {
        Self::new(
            GenerationInput::Multiview { views },
            ModelVersion::default(),
            GenerationOptions::default(),
        )
    }

    pub fn with_model_version(mut self, version: ModelVersion) -> Self {
        self.model_version = version;
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_negative_prompt(mut self, negative: impl Into<String>) -> Self {
        if let GenerationInput::Text { negative_prompt, .. } = &mut self.input {
            *negative_prompt = Some(negative.into());
        }
        self
    }

    pub fn kind(&self) -> GenerationKind {
        self.input.kind()
    }

    pub fn input(&self) -> &GenerationInput {
        &self.input
    }

    pub fn model_version(&self) -> ModelVersion {
        self.model_version
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    /// Everything that can be checked without the network.
    pub fn validate(&self) -> Result<(), SubmitError> {
        if let GenerationInput::Text {
            prompt,
            negative_prompt,
        } = &self.input
        {
            if prompt.trim().is_empty() {
                return Err(SubmitError::EmptyPrompt);
            }
            let len = prompt.chars().count();
            if len > MAX_PROMPT_CHARS {
                return Err(SubmitError::PromptTooLong {
                    len,
                    max: MAX_PROMPT_CHARS,
                });
            }
            if negative_prompt.as_deref().is_some_and(|n| n.trim().is_empty()) {
                return Err(SubmitError::EmptyNegativePrompt);
            }
        }
        for image in self.input.images() {
            image.validate()?;
        }
        self.options.validate(self.kind(), self.model_version)
    }

    /// Local files that must be uploaded before create.
    pub fn local_images(&self) -> Vec<&Path> {
        self.input
            .images()
            .into_iter()
            .filter_map(|i| match i {
                ImageRef::Local { path } => Some(path.as_path()),
                ImageRef::Uploaded(_) => None,
            })
            .collect()
    }

    /// A copy with local images replaced by their upload tokens.
    pub fn with_uploads(&self, uploads: &HashMap<PathBuf, FileToken>) -> GenerationRequest {
        let input = match &self.input {
            GenerationInput::Text { .. } => self.input.clone(),
            GenerationInput::Image { image } => GenerationInput::Image {
                image: image.resolved(uploads),
            },
            GenerationInput::Multiview { views } => GenerationInput::Multiview {
                views: MultiviewImages {
                    front: views.front.resolved(uploads),
                    left: views.left.resolved(uploads),
                    back: views.back.resolved(uploads),
                    right: views.right.as_ref().map(|r| r.resolved(uploads)),
                },
            },
        };
        GenerationRequest {
            input,
            model_version: self.model_version,
            options: self.options.clone(),
        }
    }

    /// Body of the create call. Fails while local images are unresolved.
    pub fn to_payload(&self) -> Result<Value, SubmitError> {
        let kind = self.kind();
        let mut body = Map::new();
        body.insert("type".into(), json!(kind.task_type()));
        body.insert("model_version".into(), json!(self.model_version));
        match &self.input {
            GenerationInput::Text {
                prompt,
                negative_prompt,
            } => {
                body.insert("prompt".into(), json!(prompt));
                if let Some(n) = negative_prompt {
                    body.insert("negative_prompt".into(), json!(n));
                }
            }
            GenerationInput::Image { image } => {
                body.insert("file".into(), image.file_json()?);
            }
            GenerationInput::Multiview { views } => {
                // order is fixed by the service: front, left, back, right
                let right = match &views.right {
                    Some(r) => r.file_json()?,
                    None => json!({}),
                };
                body.insert(
                    "files".into(),
                    json!([
                        views.front.file_json()?,
                        views.left.file_json()?,
                        views.back.file_json()?,
                        right
                    ]),
                );
            }
        }
        self.options.write_payload(kind, self.model_version, &mut body);
        Ok(Value::Object(body))
    }

    /// Price estimate in credits, mirroring the service's price table.
    pub fn estimated_cost(&self) -> u32 {
        let kind = self.kind();
        let mut price = 10;
        if kind != GenerationKind::Text {
            price += 10;
        }
        if self.model_version.supports_advanced() {
            if self.options.texture {
                price += 10;
            }
            if self.options.texture_quality == TextureQuality::Detailed {
                price += 10;
            }
            if self.options.quad {
                price += 5;
            }
            if self.options.style.is_some() && kind != GenerationKind::Multiview {
                price += 5;
            }
        } else {
            price += 10;
        }
        price
    }

    pub fn summary(&self) -> RequestSummary {
        let label = match &self.input {
            GenerationInput::Text { prompt, .. } => prompt.clone(),
            GenerationInput::Image { image } => image.label(),
            GenerationInput::Multiview { views } => views.front.label(),
        };
        RequestSummary {
            kind: self.kind(),
            label,
            model_version: self.model_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn map(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn text_payload_carries_prompt_and_options() {
        let req = GenerationRequest::text("a red fox")
            .with_negative_prompt("blurry")
            .with_options(GenerationOptions {
                face_limit: Some(5000),
                seed: Some(7),
                texture_quality: TextureQuality::Detailed,
                ..Default::default()
            });
        req.validate().unwrap();

        let body = req.to_payload().unwrap();
        assert_eq!(body["type"], "text_to_model");
        assert_eq!(body["model_version"], "v2.5-20250123");
        assert_eq!(body["prompt"], "a red fox");
        assert_eq!(body["negative_prompt"], "blurry");
        assert_eq!(body["face_limit"], 5000);
        assert_eq!(body["model_seed"], 7);
        assert_eq!(body["texture_quality"], "detailed");
        // image-only options stay off text requests
        assert!(body.get("orientation").is_none());
    }

    #[test]
    fn v1_payload_omits_advanced_options() {
        let req = GenerationRequest::text("cube").with_model_version(ModelVersion::V1_4);
        req.validate().unwrap();
        let body = req.to_payload().unwrap();
        assert!(body.get("pbr").is_none());
        assert!(body.get("texture").is_none());
    }

    #[test]
    fn empty_prompt_is_rejected() {
        assert_eq!(GenerationRequest::text("   ").validate(), Err(SubmitError::EmptyPrompt));
        assert_eq!(
            GenerationRequest::text("ok").with_negative_prompt("").validate(),
            Err(SubmitError::EmptyNegativePrompt)
        );
    }

    #[test]
    fn unknown_option_keys_are_rejected_per_kind() {
        let err = GenerationOptions::from_map(
            GenerationKind::Text,
            ModelVersion::V2_5,
            &map(json!({ "orientation": "align_image" })),
        )
        .unwrap_err();
        assert!(matches!(err, SubmitError::UnknownOption { key, .. } if key == "orientation"));

        let err = GenerationOptions::from_map(
            GenerationKind::Multiview,
            ModelVersion::V2_5,
            &map(json!({ "style": "gold" })),
        )
        .unwrap_err();
        assert!(matches!(err, SubmitError::UnknownOption { .. }));

        let err = GenerationOptions::from_map(
            GenerationKind::Image,
            ModelVersion::V2_5,
            &map(json!({ "texure": true })),
        )
        .unwrap_err();
        assert!(matches!(err, SubmitError::UnknownOption { key, .. } if key == "texure"));
    }

    #[test]
    fn options_from_map_parse_recognized_keys() {
        let opts = GenerationOptions::from_map(
            GenerationKind::Image,
            ModelVersion::V2_5,
            &map(json!({
                "texture_quality": "detailed",
                "texture_alignment": "geometry",
                "face_limit": 10000,
                "pbr": false,
                "style": "object:clay",
                "auto_size": true
            })),
        )
        .unwrap();
        assert_eq!(opts.texture_quality, TextureQuality::Detailed);
        assert_eq!(opts.texture_alignment, TextureAlignment::Geometry);
        assert_eq!(opts.face_limit, Some(10000));
        assert!(!opts.pbr);
        assert_eq!(opts.style, Some(ModelStyle::Clay));
        assert!(opts.auto_size);
        // untouched keys keep defaults
        assert!(opts.texture);
    }

    #[test]
    fn bad_option_values_are_rejected() {
        let err = GenerationOptions::from_map(
            GenerationKind::Text,
            ModelVersion::V2_5,
            &map(json!({ "texture_quality": "ultra" })),
        )
        .unwrap_err();
        assert!(matches!(err, SubmitError::InvalidOption(_)));

        let err = GenerationOptions::from_map(
            GenerationKind::Text,
            ModelVersion::V2_5,
            &map(json!({ "face_limit": 0 })),
        )
        .unwrap_err();
        assert!(matches!(err, SubmitError::InvalidOption(_)));
    }

    #[test]
    fn advanced_options_need_v2() {
        let err = GenerationOptions::from_map(
            GenerationKind::Text,
            ModelVersion::V1_4,
            &map(json!({ "quad": true })),
        )
        .unwrap_err();
        assert_eq!(
            err,
            SubmitError::Unsupported {
                option: "quad",
                version: ModelVersion::V1_4
            }
        );

        let req = GenerationRequest::text("x")
            .with_options(GenerationOptions {
                geometry_quality: Some(GeometryQuality::Detailed),
                ..Default::default()
            });
        assert!(matches!(req.validate(), Err(SubmitError::Unsupported { option: "geometry_quality", .. })));
        assert!(req.with_model_version(ModelVersion::V3_0).validate().is_ok());
    }

    #[test]
    fn local_images_are_validated() {
        let missing = GenerationRequest::image(ImageRef::local("/definitely/not/here.png"));
        assert!(matches!(missing.validate(), Err(SubmitError::ImageNotFound(_))));

        let mut gif = tempfile::Builder::new().suffix(".gif").tempfile().unwrap();
        gif.write_all(b"GIF89a").unwrap();
        let req = GenerationRequest::image(ImageRef::local(gif.path()));
        assert!(matches!(req.validate(), Err(SubmitError::UnsupportedImageType { ext, .. }) if ext == "gif"));

        let mut png = tempfile::Builder::new().suffix(".PNG").tempfile().unwrap();
        png.write_all(b"\x89PNG").unwrap();
        let req = GenerationRequest::image(ImageRef::local(png.path()));
        req.validate().unwrap();
        assert_eq!(req.local_images(), vec![png.path()]);
    }

    #[test]
    fn payload_requires_uploaded_images() {
        let path = PathBuf::from("/tmp/front.png");
        let req = GenerationRequest::image(ImageRef::local(&path));
        assert!(matches!(req.to_payload(), Err(SubmitError::NotUploaded(_))));

        let mut uploads = HashMap::new();
        uploads.insert(
            path.clone(),
            FileToken {
                token: "tok-1".into(),
                format: ImageFormat::Png,
            },
        );
        let resolved = req.with_uploads(&uploads);
        let body = resolved.to_payload().unwrap();
        assert_eq!(body["type"], "image_to_model");
        assert_eq!(body["file"]["file_token"], "tok-1");
        assert_eq!(body["file"]["type"], "png");
        // the original request is untouched
        assert_eq!(req.local_images().len(), 1);
    }

    #[test]
    fn multiview_payload_keeps_view_order() {
        let views = MultiviewImages {
            front: ImageRef::uploaded("f", ImageFormat::Png),
            left: ImageRef::uploaded("l", ImageFormat::Jpg),
            back: ImageRef::uploaded("b", ImageFormat::Webp),
            right: None,
        };
        let body = GenerationRequest::multiview(views).to_payload().unwrap();
        let files = body["files"].as_array().unwrap();
        assert_eq!(files.len(), 4);
        assert_eq!(files[0]["file_token"], "f");
        assert_eq!(files[1]["type"], "jpg");
        assert_eq!(files[2]["file_token"], "b");
        assert_eq!(files[3], json!({}));
    }

    #[test]
    fn cost_estimate_follows_price_table() {
        assert_eq!(GenerationRequest::text("x").estimated_cost(), 20);
        let detailed = GenerationRequest::image(ImageRef::uploaded("t", ImageFormat::Png)).with_options(
            GenerationOptions {
                texture_quality: TextureQuality::Detailed,
                quad: true,
                style: Some(ModelStyle::Gold),
                ..Default::default()
            },
        );
        assert_eq!(detailed.estimated_cost(), 10 + 10 + 10 + 10 + 5 + 5);
        let v1 = GenerationRequest::text("x").with_model_version(ModelVersion::V1_4);
        assert_eq!(v1.estimated_cost(), 20);
    }

    #[test]
    fn model_version_parses_short_and_long_names() {
        assert_eq!("v2.5".parse::<ModelVersion>().unwrap(), ModelVersion::V2_5);
        assert_eq!("v3.0-20250812".parse::<ModelVersion>().unwrap(), ModelVersion::V3_0);
        assert!("v9".parse::<ModelVersion>().is_err());
    }

    #[test]
    fn request_survives_json() {
        let req = GenerationRequest::image(ImageRef::local("/tmp/a.png"))
            .with_model_version(ModelVersion::V2_0);
        let s = serde_json::to_string(&req).unwrap();
        let back: GenerationRequest = serde_json::from_str(&s).unwrap();
        assert_eq!(back, req);
        assert_eq!(back.summary().label, "a.png");
    }
}
