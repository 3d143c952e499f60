use crate::body::{BodyStream, CompositeBodyStream};
use assert_impl::assert_impl;
use mime::{APPLICATION_OCTET_STREAM, MULTIPART_FORM_DATA};
use once_cell::sync::Lazy;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use regex::Regex;
use std::{collections::HashMap, fmt::Write, path::PathBuf};

const CRLF: &str = "\r\n";
const BOUNDARY_CRLF: &str = "\r\n\r\n";

const BOUNDARY_PREFIX: &str = "---MultipartBoundary-";
const BOUNDARY_SUFFIX: &str = "---";
const BOUNDARY_RANDOM_LEN: usize = 32;

#[derive(Debug, Clone)]
enum PartBody {
    Field(String),
    Attachment {
        file_name: String,
        path: PathBuf,
        content_type: String,
    },
}

/// Multipart 表单构建器
///
/// 维护一组命名的文本字段和文件附件,构建 multipart/form-data 格式的流式请求体,
/// 文件内容在请求体被读取时才会加载,不会提前载入内存
///
/// ### 构建并读取 Multipart 表单请求体代码实例
///
/// ```
/// use http_multipart::MultipartBuilder;
///
/// let mut builder = MultipartBuilder::new();
/// builder
///     .set_form_data("prod", "app")
///     .set_file_attachment("upload_file_minidump", "dump", "/tmp/dump.dmp", "");
/// let content_type = builder.content_type();
/// let body = builder.body_stream();
/// // 将 content_type 作为 Content-Type 头,body 作为请求体交给 HTTP 客户端发送
/// # let _ = (content_type, body);
/// ```
#[derive(Debug)]
pub struct MultipartBuilder {
    boundary: String,
    parts: HashMap<String, PartBody>,
}

impl Default for MultipartBuilder {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartBuilder {
    /// 创建 Multipart 表单构建器
    ///
    /// 分隔符由密码学安全的随机源生成,每个实例仅生成一次
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(&mut thread_rng())
    }

    /// 使用指定的随机源创建 Multipart 表单构建器
    #[must_use]
    pub fn with_rng(rng: &mut impl Rng) -> Self {
        Self {
            boundary: gen_boundary(rng),
            parts: Default::default(),
        }
    }

    /// 获取表单的分隔符
    #[inline]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// 获取请求应当携带的 Content-Type 头的值
    #[inline]
    pub fn content_type(&self) -> String {
        format!("{}; boundary={}", MULTIPART_FORM_DATA, self.boundary)
    }

    /// 设置文本字段
    ///
    /// 如果该名称此前已被设置为字段或附件,旧的条目将被移除
    pub fn set_form_data(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.parts.insert(key.into(), PartBody::Field(value.into()));
        self
    }

    /// 设置文件附件
    ///
    /// 如果该名称此前已被设置为字段或附件,旧的条目将被移除。
    /// `content_type` 为空时使用 `application/octet-stream`。
    ///
    /// # Panics
    ///
    /// `content_type` 包含 `[A-Za-z0-9/._+-]` 以外的字符时 panic,
    /// 这样的值会破坏头部行,属于调用方的编码错误
    pub fn set_file_attachment(
        &mut self,
        key: impl Into<String>,
        file_name: &str,
        path: impl Into<PathBuf>,
        content_type: &str,
    ) -> &mut Self {
        let content_type = if content_type.is_empty() {
            APPLICATION_OCTET_STREAM.as_ref().to_owned()
        } else {
            assert_safe_content_type(content_type);
            content_type.to_owned()
        };
        self.parts.insert(
            key.into(),
            PartBody::Attachment {
                file_name: encode_mime_field(file_name),
                path: path.into(),
                content_type,
            },
        );
        self
    }

    /// 构建请求体数据流
    ///
    /// 先输出所有文本字段,再输出所有文件附件,最后输出结束分隔符,
    /// 返回的数据流持有数据快照,之后对构建器的修改不影响已返回的数据流
    pub fn body_stream(&self) -> CompositeBodyStream {
        let mut streams = Vec::new();
        for (name, part) in &self.parts {
            if let PartBody::Field(value) = part {
                let mut segment = format_part_header(&self.boundary, name);
                segment.push_str(BOUNDARY_CRLF);
                segment.push_str(value);
                segment.push_str(CRLF);
                streams.push(BodyStream::from_text(segment));
            }
        }
        for (name, part) in &self.parts {
            if let PartBody::Attachment {
                file_name,
                path,
                content_type,
            } = part
            {
                let mut header = format_part_header(&self.boundary, name);
                write!(header, "; filename=\"{file_name}\"{CRLF}").unwrap();
                write!(header, "Content-Type: {content_type}{BOUNDARY_CRLF}").unwrap();
                streams.push(BodyStream::from_text(header));
                streams.push(BodyStream::from_file_path(path.as_path()));
                streams.push(BodyStream::from_text(CRLF));
            }
        }
        streams.push(BodyStream::from_text(format!(
            "--{}--{}",
            self.boundary, CRLF
        )));
        CompositeBodyStream::new(streams)
    }

    #[allow(dead_code)]
    fn ignore() {
        assert_impl!(Send: Self);
        assert_impl!(Sync: Self);
    }
}

// RFC 2046 §5.1.1 允许分隔符使用字母数字和部分标点,但部分服务端对标点兼容性差,
// 随机部分仅使用字母数字,62^32 > 2^190,足以保证不会与任何部分的内容冲突
fn gen_boundary(rng: &mut impl Rng) -> String {
    let mut boundary =
        String::with_capacity(BOUNDARY_PREFIX.len() + BOUNDARY_RANDOM_LEN + BOUNDARY_SUFFIX.len());
    boundary.push_str(BOUNDARY_PREFIX);
    for _ in 0..BOUNDARY_RANDOM_LEN {
        boundary.push(char::from(rng.sample(Alphanumeric)));
    }
    boundary.push_str(BOUNDARY_SUFFIX);
    boundary
}

// RFC 2388 §3 要求非 ASCII 字段名按 RFC 2047 编码,但主流浏览器都不这样实现,
// 而是按页面编码原样发送,这里保持同样的行为,
// 仅对会破坏头部行的回车,换行,双引号进行转义,转义百分号使编码本身可以无歧义解码
fn encode_mime_field(field: &str) -> String {
    static REGEX: Lazy<Regex> = Lazy::new(|| Regex::new("[\r\n\"%]").unwrap());
    let mut encoded = String::with_capacity(field.len());
    let mut last_match = 0;
    for m in REGEX.find_iter(field) {
        encoded.push_str(&field[last_match..m.start()]);
        match &field[m.start()..m.end()] {
            "\r" => encoded.push_str("%0d"),
            "\n" => encoded.push_str("%0a"),
            "\"" => encoded.push_str("%22"),
            "%" => encoded.push_str("%25"),
            _ => unreachable!(),
        }
        last_match = m.end();
    }
    encoded.push_str(&field[last_match..]);
    encoded
}

fn format_part_header(boundary: &str, name: &str) -> String {
    format!(
        "--{}{}Content-Disposition: form-data; name=\"{}\"",
        boundary,
        CRLF,
        encode_mime_field(name)
    )
}

fn assert_safe_content_type(content_type: &str) {
    assert!(
        content_type
            .bytes()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, b'/' | b'.' | b'_' | b'+' | b'-')),
        "unsafe character in content type {content_type:?}"
    );
}
