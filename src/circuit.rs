//! halo2 circuit proving membership of a group without revealing the member.
//!
//! Public inputs, in instance-column order:
//!
//! | row | value                                   |
//! |-----|-----------------------------------------|
//! | 0   | group root                              |
//! | 1   | nullifier hash `H(nullifier, ext)`      |
//! | 2   | external nullifier                      |
//! | 3   | signal                                  |
//!
//! Private witnesses are the identity secrets, the leaf index and the
//! Merkle siblings. The circuit enforces:
//! 1. `commitment = H1(H2(nullifier, trapdoor))`
//! 2. hashing the commitment up the path (boolean path bits) yields the root
//! 3. `nullifier_hash = H2(nullifier, external_nullifier)`
//!
//! The signal is only copied to the instance column so that the proof is
//! bound to it.

use crate::error::MembershipError;
use crate::{CIRCUIT_K, GROUP_DEPTH};
use halo2_gadgets::poseidon::{
    primitives::{ConstantLength, P128Pow5T3},
    Hash as PoseidonHash, Pow5Chip, Pow5Config,
};
use halo2_proofs::{
    circuit::{AssignedCell, Layouter, SimpleFloorPlanner, Value},
    plonk::{
        create_proof, keygen_pk, keygen_vk, verify_proof, Advice, Circuit, Column,
        ConstraintSystem, Constraints, Error, Expression, Instance, ProvingKey, Selector,
        SingleVerifier, VerifyingKey,
    },
    poly::{commitment::Params, Rotation},
    transcript::{Blake2bRead, Blake2bWrite, Challenge255},
};
use log::debug;
use pasta_curves::{pallas, vesta};
use rand::rngs::OsRng;
use std::sync::Arc;

pub const ROOT: usize = 0;
pub const NULLIFIER_HASH: usize = 1;
pub const EXTERNAL_NULLIFIER: usize = 2;
pub const SIGNAL: usize = 3;

/// Public inputs in instance-column order.
pub type PublicInputs = [pallas::Base; 4];

type Cell = AssignedCell<pallas::Base, pallas::Base>;

#[derive(Debug, Clone)]
pub struct MembershipConfig {
    advices: [Column<Advice>; 5],
    instance: Column<Instance>,
    poseidon: Pow5Config<pallas::Base, 3, 2>,
    q_swap: Selector,
}

#[derive(Debug, Default, Clone)]
pub struct MembershipCircuit {
    pub identity_nullifier: Value<pallas::Base>,
    pub identity_trapdoor: Value<pallas::Base>,
    pub leaf_index: Value<u32>,
    pub siblings: Value<[pallas::Base; GROUP_DEPTH]>,
    pub external_nullifier: Value<pallas::Base>,
    pub signal: Value<pallas::Base>,
}

impl Circuit<pallas::Base> for MembershipCircuit {
    type Config = MembershipConfig;
    type FloorPlanner = SimpleFloorPlanner;

    fn without_witnesses(&self) -> Self {
        Self::default()
    }

    fn configure(meta: &mut ConstraintSystem<pallas::Base>) -> Self::Config {
        let advices = [
            meta.advice_column(),
            meta.advice_column(),
            meta.advice_column(),
            meta.advice_column(),
            meta.advice_column(),
        ];
        let instance = meta.instance_column();
        meta.enable_equality(instance);
        for advice in advices.iter() {
            meta.enable_equality(*advice);
        }

        let partial_sbox = meta.advice_column();
        let rc_a = [meta.fixed_column(), meta.fixed_column(), meta.fixed_column()];
        let rc_b = [meta.fixed_column(), meta.fixed_column(), meta.fixed_column()];
        let constants = meta.fixed_column();
        meta.enable_constant(constants);

        let poseidon = Pow5Chip::configure::<P128Pow5T3>(
            meta,
            [advices[0], advices[1], advices[2]],
            partial_sbox,
            rc_a,
            rc_b,
        );

        // Orders (current, sibling) into (left, right) by the path bit.
        let q_swap = meta.selector();
        meta.create_gate("merkle path swap", |meta| {
            let q_swap = meta.query_selector(q_swap);
            let current = meta.query_advice(advices[0], Rotation::cur());
            let sibling = meta.query_advice(advices[1], Rotation::cur());
            let bit = meta.query_advice(advices[2], Rotation::cur());
            let left = meta.query_advice(advices[3], Rotation::cur());
            let right = meta.query_advice(advices[4], Rotation::cur());
            let one = Expression::Constant(pallas::Base::one());

            Constraints::with_selector(
                q_swap,
                [
                    ("bit is boolean", bit.clone() * (one - bit.clone())),
                    (
                        "left",
                        left - current.clone() - bit.clone() * (sibling.clone() - current.clone()),
                    ),
                    ("right", right - sibling.clone() - bit * (current - sibling)),
                ],
            )
        });

        MembershipConfig {
            advices,
            instance,
            poseidon,
            q_swap,
        }
    }

    fn synthesize(
        &self,
        config: Self::Config,
        mut layouter: impl Layouter<pallas::Base>,
    ) -> Result<(), Error> {
        let identity_nullifier = assign_private(
            layouter.namespace(|| "identity nullifier"),
            config.advices[0],
            self.identity_nullifier,
        )?;
        let identity_trapdoor = assign_private(
            layouter.namespace(|| "identity trapdoor"),
            config.advices[1],
            self.identity_trapdoor,
        )?;
        let external_nullifier = assign_private(
            layouter.namespace(|| "external nullifier"),
            config.advices[2],
            self.external_nullifier,
        )?;
        let signal = assign_private(
            layouter.namespace(|| "signal"),
            config.advices[3],
            self.signal,
        )?;

        let secret = hash_two(
            &config,
            layouter.namespace(|| "identity secret"),
            [identity_nullifier.clone(), identity_trapdoor],
        )?;
        let commitment = hash_one(&config, layouter.namespace(|| "identity commitment"), secret)?;

        let mut current = commitment;
        for level in 0..GROUP_DEPTH {
            let sibling = self.siblings.map(|siblings| siblings[level]);
            let is_right = self.leaf_index.map(|index| (index >> level) & 1 == 1);

            let (left, right) = layouter.assign_region(
                || format!("merkle swap {level}"),
                |mut region| {
                    config.q_swap.enable(&mut region, 0)?;

                    let current_value = current.value().copied();
                    current.copy_advice(|| "current", &mut region, config.advices[0], 0)?;
                    region.assign_advice(|| "sibling", config.advices[1], 0, || sibling)?;
                    region.assign_advice(
                        || "path bit",
                        config.advices[2],
                        0,
                        || is_right.map(|bit| pallas::Base::from(u64::from(bit))),
                    )?;

                    let ordered = current_value.zip(sibling).zip(is_right).map(
                        |((current, sibling), is_right)| {
                            if is_right {
                                (sibling, current)
                            } else {
                                (current, sibling)
                            }
                        },
                    );
                    let left = region.assign_advice(
                        || "left",
                        config.advices[3],
                        0,
                        || ordered.map(|(left, _)| left),
                    )?;
                    let right = region.assign_advice(
                        || "right",
                        config.advices[4],
                        0,
                        || ordered.map(|(_, right)| right),
                    )?;
                    Ok((left, right))
                },
            )?;

            current = hash_two(
                &config,
                layouter.namespace(|| format!("merkle node {level}")),
                [left, right],
            )?;
        }
        layouter.constrain_instance(current.cell(), config.instance, ROOT)?;

        let nullifier_hash = hash_two(
            &config,
            layouter.namespace(|| "nullifier hash"),
            [identity_nullifier, external_nullifier.clone()],
        )?;
        layouter.constrain_instance(nullifier_hash.cell(), config.instance, NULLIFIER_HASH)?;
        layouter.constrain_instance(
            external_nullifier.cell(),
            config.instance,
            EXTERNAL_NULLIFIER,
        )?;
        layouter.constrain_instance(signal.cell(), config.instance, SIGNAL)?;

        Ok(())
    }
}

fn assign_private(
    mut layouter: impl Layouter<pallas::Base>,
    column: Column<Advice>,
    value: Value<pallas::Base>,
) -> Result<Cell, Error> {
    layouter.assign_region(
        || "load private",
        |mut region| region.assign_advice(|| "private input", column, 0, || value),
    )
}

fn hash_two(
    config: &MembershipConfig,
    mut layouter: impl Layouter<pallas::Base>,
    message: [Cell; 2],
) -> Result<Cell, Error> {
    let chip = Pow5Chip::construct(config.poseidon.clone());
    let hasher = PoseidonHash::<
        pallas::Base,
        Pow5Chip<pallas::Base, 3, 2>,
        P128Pow5T3,
        ConstantLength<2>,
        3,
        2,
    >::init(chip, layouter.namespace(|| "poseidon init"))?;
    hasher.hash(layouter.namespace(|| "poseidon hash"), message)
}

fn hash_one(
    config: &MembershipConfig,
    mut layouter: impl Layouter<pallas::Base>,
    input: Cell,
) -> Result<Cell, Error> {
    let chip = Pow5Chip::construct(config.poseidon.clone());
    let hasher = PoseidonHash::<
        pallas::Base,
        Pow5Chip<pallas::Base, 3, 2>,
        P128Pow5T3,
        ConstantLength<1>,
        3,
        2,
    >::init(chip, layouter.namespace(|| "poseidon init"))?;
    hasher.hash(layouter.namespace(|| "poseidon hash"), [input])
}

/// Parameters and keys for the membership circuit.
///
/// Key generation takes a few seconds; use [`MembershipKeys::shared`] to
/// reuse one set per process.
pub struct MembershipKeys {
    params: Params<vesta::Affine>,
    vk: VerifyingKey<vesta::Affine>,
    pk: ProvingKey<vesta::Affine>,
}

impl MembershipKeys {
    pub fn generate() -> Result<Self, Error> {
        debug!("Generating membership circuit keys (k = {CIRCUIT_K})");
        let params = Params::<vesta::Affine>::new(CIRCUIT_K);
        let circuit = MembershipCircuit::default();
        let vk = keygen_vk(&params, &circuit)?;
        let pk = keygen_pk(&params, vk.clone(), &circuit)?;
        Ok(Self { params, vk, pk })
    }

    /// Process-wide keys, generated on first use.
    pub fn shared() -> Result<Arc<Self>, MembershipError> {
        static CACHE: parking_lot::Mutex<Option<Arc<MembershipKeys>>> =
            parking_lot::const_mutex(None);

        let mut cache = CACHE.lock();
        if let Some(keys) = cache.as_ref() {
            return Ok(Arc::clone(keys));
        }
        let keys = Arc::new(Self::generate()?);
        *cache = Some(Arc::clone(&keys));
        Ok(keys)
    }

    /// Creates a proof for `circuit` against `public_inputs`.
    pub fn prove(
        &self,
        circuit: MembershipCircuit,
        public_inputs: &PublicInputs,
    ) -> Result<Vec<u8>, Error> {
        let instances: &[&[&[pallas::Base]]] = &[&[&public_inputs[..]]];
        let mut transcript = Blake2bWrite::<_, vesta::Affine, Challenge255<_>>::init(vec![]);
        create_proof(
            &self.params,
            &self.pk,
            &[circuit],
            instances,
            OsRng,
            &mut transcript,
        )?;
        Ok(transcript.finalize())
    }

    /// Returns `true` when `proof` verifies against `public_inputs`.
    #[must_use]
    pub fn verify(&self, proof: &[u8], public_inputs: &PublicInputs) -> bool {
        let instances: &[&[&[pallas::Base]]] = &[&[&public_inputs[..]]];
        let strategy = SingleVerifier::new(&self.params);
        let mut transcript = Blake2bRead::<_, vesta::Affine, Challenge255<_>>::init(proof);
        verify_proof(
            &self.params,
            &self.vk,
            strategy,
            instances,
            &mut transcript,
        )
        .is_ok()
    }
}
