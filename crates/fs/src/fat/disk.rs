//! 块设备到字节流的适配
//!
//! `fatfs` 以 `std::io` 的字节流视角访问介质，这里把按扇区
//! 读写的 [`BlockDevice`] 包装成可随机定位的字节流。写入
//! 采取整扇区读-改-写直通策略，不做回写缓存。

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use device::BlockDevice;

/// 把 [`BlockDevice`] 适配成 `Read + Write + Seek` 的字节流
///
/// 句柄可随意重建，多个实例共享同一介质。
pub struct DiskIo {
    dev: Arc<dyn BlockDevice>,
    pos: u64,
}

impl DiskIo {
    /// 包装块设备，位置从 0 开始
    pub fn new(dev: Arc<dyn BlockDevice>) -> Self {
        DiskIo { dev, pos: 0 }
    }

    fn capacity(&self) -> u64 {
        (self.dev.total_blocks() * self.dev.block_size()) as u64
    }

    fn media_err() -> io::Error {
        io::Error::new(io::ErrorKind::Other, "block device i/o failed")
    }
}

impl Read for DiskIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bs = self.dev.block_size() as u64;
        let cap = self.capacity();
        if self.pos >= cap {
            return Ok(0);
        }
        let want = buf.len().min((cap - self.pos) as usize);
        let mut done = 0usize;
        let mut sector = vec![0u8; bs as usize];
        while done < want {
            let block = (self.pos / bs) as usize;
            let offset = (self.pos % bs) as usize;
            if !self.dev.read_block(block, &mut sector) {
                return Err(Self::media_err());
            }
            let n = (want - done).min(bs as usize - offset);
            buf[done..done + n].copy_from_slice(&sector[offset..offset + n]);
            done += n;
            self.pos += n as u64;
        }
        Ok(done)
    }
}

impl Write for DiskIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let bs = self.dev.block_size() as u64;
        let cap = self.capacity();
        if self.pos >= cap {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write past end of media",
            ));
        }
        let want = buf.len().min((cap - self.pos) as usize);
        let mut done = 0usize;
        let mut sector = vec![0u8; bs as usize];
        while done < want {
            let block = (self.pos / bs) as usize;
            let offset = (self.pos % bs) as usize;
            let n = (want - done).min(bs as usize - offset);
            if n < bs as usize {
                // 不满整扇区，先读出再改写
                if !self.dev.read_block(block, &mut sector) {
                    return Err(Self::media_err());
                }
            }
            sector[offset..offset + n].copy_from_slice(&buf[done..done + n]);
            if !self.dev.write_block(block, &sector) {
                return Err(Self::media_err());
            }
            done += n;
            self.pos += n as u64;
        }
        Ok(done)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.dev.flush() {
            Ok(())
        } else {
            Err(Self::media_err())
        }
    }
}

impl Seek for DiskIo {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => self.capacity() as i64 + n,
            SeekFrom::Current(n) => self.pos as i64 + n,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of media",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device::RamDisk;

    #[test]
    fn test_rmw_across_sectors() {
        let disk = RamDisk::new(2048, 512);
        let mut io = DiskIo::new(disk.clone());

        // write spanning the 512-byte sector boundary
        io.seek(SeekFrom::Start(500)).unwrap();
        io.write_all(&[0xAB; 24]).unwrap();

        let mut io2 = DiskIo::new(disk);
        io2.seek(SeekFrom::Start(500)).unwrap();
        let mut back = [0u8; 24];
        io2.read_exact(&mut back).unwrap();
        assert_eq!(back, [0xAB; 24]);

        // bytes around the span untouched
        io2.seek(SeekFrom::Start(499)).unwrap();
        let mut one = [0u8; 1];
        io2.read_exact(&mut one).unwrap();
        assert_eq!(one[0], 0);
    }

    #[test]
    fn test_read_past_end() {
        let disk = RamDisk::new(1024, 512);
        let mut io = DiskIo::new(disk);
        io.seek(SeekFrom::Start(1024)).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(io.read(&mut buf).unwrap(), 0);
    }
}
