//! 通用工具函数

use crate::error::{MammoError, Result};
use crate::models::ImageUpload;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::Rng;
use uuid::Uuid;

/// 一次性验证码取值范围
pub const CODE_RANGE: std::ops::RangeInclusive<u32> = 100_000..=999_999;

/// 生成病例标识
pub fn generate_case_id() -> String {
    format!("case-{}", Uuid::new_v4().simple())
}

/// 生成用户标识
pub fn generate_user_id() -> String {
    format!("u-{}", Uuid::new_v4().simple())
}

/// 生成六位数字验证码
pub fn generate_numeric_code() -> String {
    rand::thread_rng().gen_range(CODE_RANGE).to_string()
}

/// 邮箱比较前统一去空格、转小写
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// 患者标识统一为大写
pub fn normalize_patient_ref(patient_ref: &str) -> String {
    patient_ref.trim().to_uppercase()
}

/// 保留两位小数
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 把上传的影像编码为 data URL 预览
pub fn encode_data_url(upload: &ImageUpload) -> String {
    format!("data:{};base64,{}", upload.mime_type, STANDARD.encode(&upload.bytes))
}

/// 从 data URL 预览还原影像
///
/// 缺少 mime 类型时按 `image/jpeg` 处理。远程地址无法还原。
pub fn decode_data_url(url: &str) -> Result<ImageUpload> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| MammoError::Validation("preview is not a data URL".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| MammoError::Validation("malformed data URL".to_string()))?;

    let header = header
        .strip_suffix(";base64")
        .ok_or_else(|| MammoError::Validation("data URL is not base64 encoded".to_string()))?;
    let mime_type = if header.is_empty() {
        "image/jpeg".to_string()
    } else {
        header.to_string()
    };

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| MammoError::Validation(format!("invalid base64 payload: {}", e)))?;

    Ok(ImageUpload { bytes, mime_type })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_numeric_code() {
        for _ in 0..200 {
            let code = generate_numeric_code();
            assert_eq!(code.len(), 6);
            let value: u32 = code.parse().unwrap();
            assert!(CODE_RANGE.contains(&value));
        }
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_email("  Doctor@Example.COM "), "doctor@example.com");
        assert_eq!(normalize_patient_ref(" p-01 "), "P-01");
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(0.85), 0.85);
        assert_eq!(round2(0.9510), 0.95);
        assert_eq!(round2(0.0), 0.0);
    }

    #[test]
    fn test_data_url_round_trip() {
        let upload = ImageUpload {
            bytes: vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10],
            mime_type: "image/png".to_string(),
        };
        let url = encode_data_url(&upload);
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(decode_data_url(&url).unwrap(), upload);
    }

    #[test]
    fn test_decode_rejects_remote_url() {
        assert!(decode_data_url("https://storage.example.org/mammogram.jpg").is_err());
        assert!(decode_data_url("data:image/png,rawtext").is_err());
    }

    #[test]
    fn test_generated_ids_are_prefixed() {
        assert!(generate_case_id().starts_with("case-"));
        assert!(generate_user_id().starts_with("u-"));
        assert_ne!(generate_case_id(), generate_case_id());
    }
}
