use crate::error::ConfigError;
use crate::models::matrix::MatrixDefinition;
use std::path::Path;
use tokio::fs;

/// 从 TOML 文件加载矩阵定义（只读，不会修改文件）
pub async fn load_matrix_definition(path: &Path) -> Result<MatrixDefinition, ConfigError> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;

    tracing::debug!("正在解析矩阵配置: {}", path.display());
    parse_matrix_definition(&content, &path.display().to_string())
}

/// 从字符串解析矩阵定义，`origin` 只用于错误信息
pub fn parse_matrix_definition(content: &str, origin: &str) -> Result<MatrixDefinition, ConfigError> {
    toml::from_str(content).map_err(|source| ConfigError::ParseFailed {
        path: origin.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::matrix::tests::SAMPLE;

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = load_matrix_definition(Path::new("does/not/exist.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::ReadFailed { .. }));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let content = format!("{}\nunexpected = true\n", SAMPLE.replace("[matrix]", "[matrix]\nextra = 1"));
        let err = parse_matrix_definition(&content, "inline").unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed { .. }));
    }

    #[test]
    fn test_parse_sample() {
        let def = parse_matrix_definition(SAMPLE, "inline").unwrap();
        assert_eq!(def.matrix.websites.len(), 2);
        assert_eq!(def.cities["tokyo"], "Tokyo");
    }
}
