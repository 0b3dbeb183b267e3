//! 输出缓冲区
//!
//! 有容量上限的字节队列。追加超出上限时丢弃最旧的字节，保证最新输出保留。

use std::collections::VecDeque;

/// 有界输出缓冲区（丢弃最旧）
#[derive(Debug)]
pub struct OutputBuffer {
    data: VecDeque<u8>,
    capacity: usize,
    /// 累计被淘汰的字节数
    evicted: u64,
}

impl OutputBuffer {
    /// 创建指定容量的缓冲区
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::new(),
            capacity: capacity.max(1),
            evicted: 0,
        }
    }

    /// 追加数据，必要时从头部淘汰
    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.len() >= self.capacity {
            // 单次数据已超过容量，只保留其尾部
            self.evicted += (self.data.len() + chunk.len() - self.capacity) as u64;
            self.data.clear();
            self.data.extend(&chunk[chunk.len() - self.capacity..]);
            return;
        }

        let overflow = (self.data.len() + chunk.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.data.drain(..overflow);
            self.evicted += overflow as u64;
        }
        self.data.extend(chunk);
    }

    /// 取出并清空全部内容
    pub fn drain(&mut self) -> Vec<u8> {
        Vec::from(std::mem::take(&mut self.data))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_drain() {
        let mut buffer = OutputBuffer::new(16);
        buffer.push(b"hello ");
        buffer.push(b"world");
        assert_eq!(buffer.len(), 11);
        assert_eq!(buffer.drain(), b"hello world");
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut buffer = OutputBuffer::new(8);
        buffer.push(b"abcdef");
        buffer.push(b"ghij");
        assert_eq!(buffer.len(), 8);
        assert_eq!(buffer.evicted(), 2);
        assert_eq!(buffer.drain(), b"cdefghij");
    }

    #[test]
    fn test_oversized_chunk_keeps_tail() {
        let mut buffer = OutputBuffer::new(4);
        buffer.push(b"xy");
        buffer.push(b"0123456789");
        assert_eq!(buffer.evicted(), 8);
        assert_eq!(buffer.drain(), b"6789");
    }

    #[test]
    fn test_exact_capacity() {
        let mut buffer = OutputBuffer::new(4);
        buffer.push(b"abcd");
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.evicted(), 0);
        buffer.push(b"e");
        assert_eq!(buffer.drain(), b"bcde");
    }

    #[test]
    fn test_one_mebibyte_ceiling() {
        let capacity = 1024 * 1024;
        let mut buffer = OutputBuffer::new(capacity);
        let chunk = vec![b'a'; 64 * 1024];
        for _ in 0..20 {
            buffer.push(&chunk);
        }
        buffer.push(b"tail");
        let drained = buffer.drain();
        assert_eq!(drained.len(), capacity);
        assert!(drained.ends_with(b"tail"));
    }
}
