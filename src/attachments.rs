//! # 附件
//!
//! 粘贴的文件、图片与长文本都复制到话题目录下的 `attachments/`，
//! 以 UUID 重命名，消息里只保存 [`StoredAttachment`] 描述。
//!
//! 发送前可用 [`extract_text`] 把 PDF、DOCX、PPTX 与纯文本附件转成文字，
//! 并入用户消息正文。解析都是同步 IO，放在 `spawn_blocking` 中执行。

use std::io::Read;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;
use uuid::Uuid;
use zip::ZipArchive;

use crate::error::{ChatError, ChatResult};
use crate::models::now_millis;
use crate::paths::DataPaths;
use crate::store::json_file::ensure_dir;

/// 落盘后的附件描述，写入消息的 `attachments` 字段。
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredAttachment {
    pub id: String,
    /// 用户看到的原始文件名。
    pub name: String,
    pub internal_path: PathBuf,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size: u64,
    pub created_at: i64,
}

/// 前端粘贴的文件来源。
#[derive(Deserialize, Clone, Debug)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PastedFile {
    Path {
        path: PathBuf,
    },
    Base64 {
        data: String,
        #[serde(default)]
        extension: Option<String>,
    },
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// 按扩展名猜测 MIME 类型。
pub fn guess_mime(path: &Path) -> String {
    let mime = match extension_of(path).as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "txt" | "md" | "log" | "csv" => "text/plain",
        "json" => "application/json",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    };
    mime.to_string()
}

pub struct AttachmentStore {
    paths: DataPaths,
}

impl AttachmentStore {
    pub fn new(paths: DataPaths) -> Self {
        Self { paths }
    }

    /// 写入一份附件。`original_name` 的扩展名决定落盘文件的扩展名。
    pub async fn store_bytes(
        &self,
        agent_id: &str,
        topic_id: &str,
        bytes: &[u8],
        original_name: &str,
        mime_type: String,
    ) -> ChatResult<StoredAttachment> {
        if agent_id.trim().is_empty() || topic_id.trim().is_empty() {
            return Err(ChatError::InvalidArgument(
                "保存附件需要 agentId 与 topicId".into(),
            ));
        }
        let dir = self.paths.attachments_dir(agent_id, topic_id)?;
        ensure_dir(&dir).await?;

        let id = Uuid::new_v4().to_string();
        let ext = extension_of(Path::new(original_name));
        let file_name = if ext.is_empty() {
            id.clone()
        } else {
            format!("{id}.{ext}")
        };
        let internal_path = dir.join(file_name);
        fs::write(&internal_path, bytes)
            .await
            .map_err(|e| ChatError::io(&internal_path, e))?;

        info!("附件 {original_name} 已保存到 {}", internal_path.display());
        Ok(StoredAttachment {
            id,
            name: original_name.to_string(),
            internal_path,
            mime_type,
            size: bytes.len() as u64,
            created_at: now_millis(),
        })
    }

    pub async fn handle_file_paste(
        &self,
        agent_id: &str,
        topic_id: &str,
        file: PastedFile,
    ) -> ChatResult<StoredAttachment> {
        match file {
            PastedFile::Path { path } => {
                let bytes = fs::read(&path).await.map_err(|e| ChatError::io(&path, e))?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "file".to_string());
                self.store_bytes(agent_id, topic_id, &bytes, &name, guess_mime(&path))
                    .await
            }
            PastedFile::Base64 { data, extension } => {
                let ext = extension.unwrap_or_else(|| "png".to_string());
                let bytes = general_purpose::STANDARD
                    .decode(data.trim())
                    .map_err(|e| ChatError::InvalidArgument(format!("base64 数据无效: {e}")))?;
                let name = format!("pasted_image_{}.{ext}", now_millis());
                self.store_bytes(agent_id, topic_id, &bytes, &name, format!("image/{ext}"))
                    .await
            }
        }
    }

    /// 长文本粘贴保存为 `.txt` 附件。
    pub async fn handle_text_paste(
        &self,
        agent_id: &str,
        topic_id: &str,
        text: &str,
    ) -> ChatResult<StoredAttachment> {
        let name = format!("pasted_text_{}.txt", now_millis());
        self.store_bytes(agent_id, topic_id, text.as_bytes(), &name, "text/plain".into())
            .await
    }
}

/// 收集 Office Open XML 中 `<t>` 标签内的文字。
fn xml_text(xml: &str) -> String {
    let mut out = String::new();
    let mut in_text = false;
    for event in xml::EventReader::new(xml.as_bytes()) {
        match event {
            Ok(xml::reader::XmlEvent::StartElement { name, .. }) if name.local_name == "t" => {
                in_text = true;
            }
            Ok(xml::reader::XmlEvent::EndElement { name }) if name.local_name == "t" => {
                in_text = false;
            }
            Ok(xml::reader::XmlEvent::Characters(text)) if in_text => out.push_str(&text),
            _ => {}
        }
    }
    out
}

fn office_text(path: &Path, slides: bool) -> ChatResult<String> {
    let extract_err = |message: String| ChatError::Extract {
        path: path.to_path_buf(),
        message,
    };
    let file = std::fs::File::open(path).map_err(|e| ChatError::io(path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| extract_err(e.to_string()))?;

    let mut parts: Vec<String> = archive
        .file_names()
        .filter(|name| {
            if slides {
                name.starts_with("ppt/slides/slide") && name.ends_with(".xml")
            } else {
                *name == "word/document.xml"
            }
        })
        .map(str::to_string)
        .collect();
    // slide10 应排在 slide2 之后
    parts.sort_by_key(|name| {
        let digits: String = name.chars().filter(char::is_ascii_digit).collect();
        digits.parse::<u32>().unwrap_or(0)
    });

    let mut text = String::new();
    for name in parts {
        let mut entry = archive
            .by_name(&name)
            .map_err(|e| extract_err(e.to_string()))?;
        let mut xml = String::new();
        entry
            .read_to_string(&mut xml)
            .map_err(|e| ChatError::io(path, e))?;
        text.push_str(&xml_text(&xml));
        text.push('\n');
    }
    Ok(text)
}

fn extract_text_blocking(path: &Path) -> ChatResult<Option<String>> {
    match extension_of(path).as_str() {
        "pdf" => pdf_extract::extract_text(path)
            .map(Some)
            .map_err(|e| ChatError::Extract {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        "docx" => office_text(path, false).map(Some),
        "pptx" => office_text(path, true).map(Some),
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "mp3" | "wav" | "mp4" | "zip" => Ok(None),
        _ => {
            let bytes = std::fs::read(path).map_err(|e| ChatError::io(path, e))?;
            let (text, _, _) = encoding_rs::UTF_8.decode(&bytes);
            Ok(Some(text.into_owned()))
        }
    }
}

/// 提取附件中的文字。图片、音视频等二进制附件返回 `None`。
pub async fn extract_text(path: impl Into<PathBuf>) -> ChatResult<Option<String>> {
    let path = path.into();
    let task_path = path.clone();
    tokio::task::spawn_blocking(move || extract_text_blocking(&task_path))
        .await
        .map_err(|e| ChatError::Extract {
            path,
            message: e.to_string(),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;

    fn write_docx(path: &Path, body: &str) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("word/document.xml", FileOptions::default())
            .unwrap();
        zip.write_all(body.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn docx_text_is_extracted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.docx");
        write_docx(
            &path,
            r#"<w:document xmlns:w="w"><w:body><w:p><w:r><w:t>季度</w:t></w:r><w:r><w:t>报告</w:t></w:r></w:p></w:body></w:document>"#,
        );
        let text = extract_text(&path).await.unwrap().unwrap();
        assert_eq!(text.trim(), "季度报告");
    }

    #[tokio::test]
    async fn images_have_no_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.png");
        tokio::fs::write(&path, [0x89, b'P', b'N', b'G']).await.unwrap();
        assert_eq!(extract_text(&path).await.unwrap(), None);
    }

    #[tokio::test]
    async fn paste_into_traversal_topic_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = AttachmentStore::new(DataPaths::from_root(dir.path().join("root")));
        let result = store.handle_text_paste("A1", "../../../loot", "x").await;
        assert!(matches!(result, Err(ChatError::InvalidArgument(_))));
        assert!(!dir.path().join("loot").exists());
    }

    #[tokio::test]
    async fn text_paste_is_stored_under_topic() {
        let dir = TempDir::new().unwrap();
        let paths = DataPaths::from_root(dir.path());
        let store = AttachmentStore::new(paths.clone());

        let stored = store
            .handle_text_paste("A1", "T1", "很长的一段文字")
            .await
            .unwrap();
        assert!(stored
            .internal_path
            .starts_with(paths.attachments_dir("A1", "T1").unwrap()));
        assert_eq!(stored.mime_type, "text/plain");
        assert_eq!(
            extract_text(&stored.internal_path).await.unwrap().as_deref(),
            Some("很长的一段文字")
        );
    }

    #[tokio::test]
    async fn base64_paste_decodes_image() {
        let dir = TempDir::new().unwrap();
        let store = AttachmentStore::new(DataPaths::from_root(dir.path()));
        let stored = store
            .handle_file_paste(
                "A1",
                "T1",
                PastedFile::Base64 {
                    data: general_purpose::STANDARD.encode(b"img"),
                    extension: Some("jpg".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(stored.mime_type, "image/jpg");
        assert_eq!(stored.size, 3);
        assert!(stored.internal_path.to_string_lossy().ends_with(".jpg"));
    }

    #[tokio::test]
    async fn missing_topic_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = AttachmentStore::new(DataPaths::from_root(dir.path()));
        assert!(matches!(
            store.handle_text_paste("A1", "", "x").await,
            Err(ChatError::InvalidArgument(_))
        ));
    }
}
