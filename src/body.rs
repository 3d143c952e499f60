use assert_impl::assert_impl;
use log::debug;
use std::{
    collections::VecDeque,
    fs::File,
    io::{Cursor, Read, Result as IoResult},
    path::PathBuf,
};

#[derive(Debug)]
enum BodyStreamInner {
    Bytes(Cursor<Vec<u8>>),
    FilePending(PathBuf),
    FileOpened(File),
}

/// 请求体数据流片段
///
/// 片段内容既可以是内存数据,也可以是文件内容,文件在首次读取时才会被打开
#[derive(Debug)]
pub struct BodyStream(BodyStreamInner);

impl BodyStream {
    /// 创建内容为字符串的数据流片段
    #[inline]
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::from_bytes(text.into().into_bytes())
    }

    /// 创建内容为内存数据的数据流片段
    #[inline]
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(BodyStreamInner::Bytes(Cursor::new(bytes)))
    }

    /// 创建内容为文件的数据流片段
    ///
    /// 创建时不访问文件系统,文件不存在或不可读的错误将在读取时返回
    #[inline]
    #[must_use]
    pub fn from_file_path(path: impl Into<PathBuf>) -> Self {
        Self(BodyStreamInner::FilePending(path.into()))
    }

    /// 获取数据流片段的总长度
    ///
    /// 仅内存数据片段能返回长度,文件片段在读取前长度未知
    #[inline]
    pub fn size(&self) -> Option<u64> {
        match &self.0 {
            BodyStreamInner::Bytes(bytes) => Some(bytes.get_ref().len() as u64),
            BodyStreamInner::FilePending(_) | BodyStreamInner::FileOpened(_) => None,
        }
    }

    #[allow(dead_code)]
    fn ignore() {
        assert_impl!(Send: Self);
        assert_impl!(Sync: Self);
    }
}

impl Read for BodyStream {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        match &mut self.0 {
            BodyStreamInner::Bytes(bytes) => bytes.read(buf),
            BodyStreamInner::FileOpened(file) => file.read(buf),
            BodyStreamInner::FilePending(path) => {
                debug!("opening {} for body streaming", path.display());
                let file = File::open(path)?;
                self.0 = BodyStreamInner::FileOpened(file);
                self.read(buf)
            }
        }
    }
}

/// 组合数据流
///
/// 持有一组有序的数据流片段,按顺序读取,对外表现为单个连续的字节流,
/// 每个片段读取完毕后立即释放
#[derive(Debug)]
pub struct CompositeBodyStream(VecDeque<BodyStream>);

impl CompositeBodyStream {
    /// 创建组合数据流,获取所有数据流片段的所有权
    #[inline]
    #[must_use]
    pub fn new(streams: Vec<BodyStream>) -> Self {
        Self(streams.into())
    }

    /// 获取组合数据流的总长度
    ///
    /// 任意一个片段长度未知时返回 [`None`]
    #[inline]
    pub fn size(&self) -> Option<u64> {
        self.0.iter().map(BodyStream::size).sum()
    }

    #[allow(dead_code)]
    fn ignore() {
        assert_impl!(Send: Self);
        assert_impl!(Sync: Self);
    }
}

impl Read for CompositeBodyStream {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        let mut have_read = 0usize;
        while have_read < buf.len() {
            let Some(stream) = self.0.front_mut() else {
                break;
            };
            let n = stream.read(&mut buf[have_read..])?;
            if n == 0 {
                self.0.pop_front();
            } else {
                have_read += n;
            }
        }
        Ok(have_read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs::File, io::Write};
    use tempfile::tempdir;

    #[test]
    fn test_body_stream_size() {
        env_logger::builder().is_test(true).try_init().ok();

        assert_eq!(BodyStream::from_text("hello").size(), Some(5));
        assert_eq!(BodyStream::from_bytes(vec![0u8; 16]).size(), Some(16));
        assert_eq!(BodyStream::from_file_path("/missing/file").size(), None);
    }

    #[test]
    fn test_file_stream_is_opened_lazily() -> IoResult<()> {
        env_logger::builder().is_test(true).try_init().ok();

        let tempdir = tempdir()?;
        let file_path = tempdir.path().join("late.bin");

        // 文件在创建片段之后才写入
        let mut stream = BodyStream::from_file_path(&file_path);
        File::create(&file_path)?.write_all(b"created later")?;

        let mut content = String::new();
        stream.read_to_string(&mut content)?;
        assert_eq!(content, "created later");

        tempdir.close()?;
        Ok(())
    }

    #[test]
    fn test_missing_file_surfaces_read_error() {
        env_logger::builder().is_test(true).try_init().ok();

        let mut stream = BodyStream::from_file_path("/no/such/file");
        let err = stream.read(&mut [0u8; 16]).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_composite_concatenation() -> IoResult<()> {
        env_logger::builder().is_test(true).try_init().ok();

        let tempdir = tempdir()?;
        let file_path = tempdir.path().join("mid.txt");
        File::create(&file_path)?.write_all(b"-middle-")?;

        let mut composite = CompositeBodyStream::new(vec![
            BodyStream::from_text("head"),
            BodyStream::from_file_path(&file_path),
            BodyStream::from_text("tail"),
        ]);

        // 以小缓冲区多次读取,覆盖跨片段推进
        let mut content = Vec::new();
        loop {
            let mut buf = [0u8; 3];
            let n = composite.read(&mut buf)?;
            if n == 0 {
                break;
            }
            content.extend_from_slice(&buf[..n]);
        }
        assert_eq!(content, b"head-middle-tail");

        tempdir.close()?;
        Ok(())
    }

    #[test]
    fn test_composite_size() {
        env_logger::builder().is_test(true).try_init().ok();

        let known = CompositeBodyStream::new(vec![
            BodyStream::from_text("head"),
            BodyStream::from_text("tail"),
        ]);
        assert_eq!(known.size(), Some(8));

        let unknown = CompositeBodyStream::new(vec![
            BodyStream::from_text("head"),
            BodyStream::from_file_path("/no/such/file"),
        ]);
        assert_eq!(unknown.size(), None);

        let empty = CompositeBodyStream::new(vec![]);
        assert_eq!(empty.size(), Some(0));
    }
}
