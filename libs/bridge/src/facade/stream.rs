use super::{binary_arg, counted, failure, sized_copy, Libp2p};
use crate::error::Result;
use crate::handle::HandleType;
use actor_runtime::Term;
use bytes::Bytes;
use tracing::trace;

impl Libp2p {
    /// Read up to `read_buffer_size` bytes. An empty binary means the peer
    /// closed its side; short reads are normal.
    pub async fn stream_read(&self, stream: &Term) -> Result<Bytes> {
        let stream = self.resource(stream, HandleType::Stream)?;
        let size = self.config.read_buffer_size;
        let library = self.library.clone();

        self.pool
            .run("stream_read", move || {
                let mut buffer = vec![0u8; size];
                let n = library.stream_read(stream.raw(), &mut buffer);
                let n = counted(library.as_ref(), "stream_read", n, "failed to read")?;
                buffer.truncate(n);
                trace!(stream = stream.raw(), bytes = n, "Stream read");
                Ok(Bytes::from(buffer))
            })
            .await
    }

    /// Write all of `data`
    pub async fn stream_write(&self, stream: &Term, data: &Term) -> Result<()> {
        let stream = self.resource(stream, HandleType::Stream)?;
        let data = binary_arg(data, "data")?;
        let library = self.library.clone();

        self.pool
            .run("stream_write", move || {
                let mut written = 0;
                while written < data.len() {
                    let n = library.stream_write(stream.raw(), &data[written..]);
                    let n = counted(library.as_ref(), "stream_write", n, "failed to write")?;
                    if n == 0 {
                        return Err(failure(library.as_ref(), "stream_write", "failed to write"));
                    }
                    written += n;
                }
                trace!(stream = stream.raw(), bytes = written, "Stream write");
                Ok(())
            })
            .await
    }

    /// Close both directions. Idempotent; later reads and writes fail with
    /// a closed error.
    pub fn stream_close(&self, stream: &Term) -> Result<()> {
        let stream = self.registry.lookup(stream, HandleType::Stream)?;
        if stream.mark_closed() {
            self.library.stream_close(stream.raw());
        }
        Ok(())
    }

    /// Half-close: signal end of stream to the peer, keep reading
    pub fn stream_close_write(&self, stream: &Term) -> Result<()> {
        let stream = self.resource(stream, HandleType::Stream)?;
        self.library.stream_close_write(stream.raw());
        Ok(())
    }

    /// Negotiated protocol id
    pub fn stream_protocol(&self, stream: &Term) -> Result<Bytes> {
        let stream = self.resource(stream, HandleType::Stream)?;
        let raw = stream.raw();
        sized_copy(
            self.library.as_ref(),
            "stream_protocol",
            self.library.stream_protocol_len(raw),
            |buffer| self.library.stream_protocol(raw, buffer),
        )
    }
}
