//! Hash helpers – abstracción para cambiar de algoritmo sin tocar el resto
//! del core.
//!
//! Contrato de delta: el digest debe ser una función pura de "todo lo que
//! debe invalidar el resultado cacheado de la entidad". Los helpers acá
//! garantizan estabilidad de representación (separador fijo, orden definido)
//! para que el mismo input lógico produzca siempre el mismo digest.

use crate::constants::SHORT_DIGEST_LEN;
use blake3::Hasher;

/// Hashea un string y devuelve hex completo.
pub fn hash_hex(input: &str) -> String {
    let mut h = Hasher::new();
    h.update(input.as_bytes());
    h.finalize().to_hex().to_string()
}

/// Digest corto de ancho fijo sobre las partes concatenadas con `|`.
///
/// Es el formato que persiste el ProcessingLedger; las partes deben llegar
/// siempre en el mismo orden.
pub fn short_hash(parts: &[&str]) -> String {
    let combined = parts.join("|");
    let mut hex = hash_hex(&combined);
    hex.truncate(SHORT_DIGEST_LEN);
    hex
}

/// Fingerprint estable de un corpus upstream (p. ej. el set de cualidades
/// aprobadas): ordena los identificadores y hashea el join. Agregar o quitar
/// un elemento upstream cambia el fingerprint y con él el digest de TODA
/// entidad downstream que lo incluya, aunque el contenido propio de la
/// entidad no haya cambiado.
pub fn corpus_fingerprint<I, S>(ids: I) -> String
    where I: IntoIterator<Item = S>,
          S: AsRef<str>
{
    let mut sorted: Vec<String> = ids.into_iter().map(|s| s.as_ref().to_string()).collect();
    sorted.sort();
    let mut hex = hash_hex(&sorted.join(":"));
    hex.truncate(SHORT_DIGEST_LEN);
    hex
}
