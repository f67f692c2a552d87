//! The optional signatures block (present iff `ContainerFlags::signed`).
//!
//! The source format's TOC-signature scheme applies a private-key operation
//! directly to two 20-byte hashes. We implement that contract as RSA
//! PKCS#1 v1.5 signing over a SHA-1 digest (see the Open Question entry in
//! `DESIGN.md`): it is authenticity-of-a-hash, verified with the public half,
//! which is exactly what the container format needs.

use crate::codec::hash::{self, Digest20, DIGEST_SIZE};
use crate::error::{ErrorCode, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use std::io::{self, Read, Write};

#[derive(Debug, Clone)]
pub struct SignaturesBlock {
    pub toc_signature: Vec<u8>,
    pub blocks_signature: Vec<u8>,
    pub block_hashes: Vec<Digest20>,
}

impl SignaturesBlock {
    /// Builds the block given the TOC header bytes, the concatenated
    /// per-block hashes, and the signing key.
    pub fn create(
        header_bytes: &[u8],
        block_hashes: Vec<Digest20>,
        signing_key: &RsaPrivateKey,
    ) -> Result<Self> {
        let toc_hash = hash::hash(header_bytes);
        let concatenated: Vec<u8> = block_hashes.iter().flatten().copied().collect();
        let blocks_hash = hash::hash(&concatenated);

        let key = SigningKey::<Sha1>::new(signing_key.clone());
        let mut rng = rand::thread_rng();
        let toc_signature = key.sign_with_rng(&mut rng, &toc_hash).to_vec();
        let blocks_signature = key.sign_with_rng(&mut rng, &blocks_hash).to_vec();

        Ok(SignaturesBlock {
            toc_signature,
            blocks_signature,
            block_hashes,
        })
    }

    /// Verifies this block against the TOC header bytes and a public key,
    /// returning [`ErrorCode::SignatureError`] on any mismatch.
    pub fn verify(
        &self,
        header_bytes: &[u8],
        public_key: &RsaPublicKey,
        container_short_name: &str,
    ) -> Result<()> {
        let toc_hash = hash::hash(header_bytes);
        let concatenated: Vec<u8> = self.block_hashes.iter().flatten().copied().collect();
        let blocks_hash = hash::hash(&concatenated);

        let verifying_key = VerifyingKey::<Sha1>::new(public_key.clone());
        let sig_error = || ErrorCode::SignatureError {
            container: container_short_name.to_string(),
            block_index: u32::MAX,
        };

        let toc_sig = Signature::try_from(self.toc_signature.as_slice()).map_err(|_| sig_error())?;
        verifying_key
            .verify(&toc_hash, &toc_sig)
            .map_err(|_| sig_error())?;

        let blocks_sig =
            Signature::try_from(self.blocks_signature.as_slice()).map_err(|_| sig_error())?;
        verifying_key
            .verify(&blocks_hash, &blocks_sig)
            .map_err(|_| sig_error())?;

        Ok(())
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_i32::<LittleEndian>(self.toc_signature.len() as i32)?;
        writer.write_all(&self.toc_signature)?;
        writer.write_all(&self.blocks_signature)?;
        for hash in &self.block_hashes {
            writer.write_all(hash)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R, block_count: u32) -> Result<Self> {
        let hash_size = reader.read_i32::<LittleEndian>().map_err(ErrorCode::from)? as usize;
        let mut toc_signature = vec![0u8; hash_size];
        reader.read_exact(&mut toc_signature).map_err(ErrorCode::from)?;
        let mut blocks_signature = vec![0u8; hash_size];
        reader
            .read_exact(&mut blocks_signature)
            .map_err(ErrorCode::from)?;

        let mut block_hashes = Vec::with_capacity(block_count as usize);
        for _ in 0..block_count {
            let mut digest = [0u8; DIGEST_SIZE];
            reader.read_exact(&mut digest).map_err(ErrorCode::from)?;
            block_hashes.push(digest);
        }

        Ok(SignaturesBlock {
            toc_signature,
            blocks_signature,
            block_hashes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;

    fn test_keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public = RsaPublicKey::from(&private);
        (private, public)
    }

    #[test]
    fn valid_signature_verifies() {
        let (private, public) = test_keypair();
        let header_bytes = b"fake-header-bytes";
        let block_hashes = vec![[1u8; DIGEST_SIZE], [2u8; DIGEST_SIZE]];
        let block = SignaturesBlock::create(header_bytes, block_hashes, &private).unwrap();
        assert!(block.verify(header_bytes, &public, "test").is_ok());
    }

    #[test]
    fn tampered_header_fails_verification() {
        let (private, public) = test_keypair();
        let block =
            SignaturesBlock::create(b"original", vec![[1u8; DIGEST_SIZE]], &private).unwrap();
        assert!(block.verify(b"tampered!", &public, "test").is_err());
    }

    #[test]
    fn round_trips_through_bytes() {
        let (private, _public) = test_keypair();
        let block =
            SignaturesBlock::create(b"header", vec![[3u8; DIGEST_SIZE], [4u8; DIGEST_SIZE]], &private)
                .unwrap();
        let mut buf = Vec::new();
        block.write(&mut buf).unwrap();
        let read_back = SignaturesBlock::read(&mut &buf[..], 2).unwrap();
        assert_eq!(block.toc_signature, read_back.toc_signature);
        assert_eq!(block.block_hashes, read_back.block_hashes);
    }
}
